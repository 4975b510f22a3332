//! Shared types for VALBOT.
//!
//! The candidate opportunity, the market/execution mode enums, and the
//! crate-level configuration error. Broker, strategy and storage modules all
//! depend on these without depending on each other.

use serde::Deserialize;
use std::fmt;

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A value-bet opportunity produced by the market feed.
///
/// Read-only: the decision engine consumes each candidate exactly once.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    /// Market identifier, e.g. `"1X2"`, `"O/U_2.5"`, `"BTTS"`, `"DNB"`.
    pub market: String,
    /// Human-readable fixture label.
    #[serde(rename = "match")]
    pub match_label: String,
    pub selection: String,
    /// Decimal odds observed by the feed.
    pub odds_detect: f64,
    /// Expected value in percent (5.2 = +5.2%).
    pub ev_pct: f64,
    pub latency_ms: u64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | {} @ {} | EV {}%",
            self.market, self.match_label, self.selection, self.odds_detect, self.ev_pct,
        )
    }
}

impl Candidate {
    /// Reject candidates the feed should never have produced.
    pub fn validate(&self) -> Result<(), ValbotError> {
        if self.market.trim().is_empty() {
            return Err(ValbotError::InvalidCandidate("empty market id".into()));
        }
        if !self.odds_detect.is_finite() || self.odds_detect <= 0.0 {
            return Err(ValbotError::InvalidCandidate(format!(
                "odds_detect must be positive, got {}",
                self.odds_detect
            )));
        }
        if !self.ev_pct.is_finite() {
            return Err(ValbotError::InvalidCandidate(format!(
                "ev_pct must be finite, got {}",
                self.ev_pct
            )));
        }
        Ok(())
    }

    /// Helper to build a sample candidate with sensible defaults.
    #[cfg(test)]
    pub fn sample(market: &str, ev_pct: f64) -> Self {
        Candidate {
            market: market.to_string(),
            match_label: "Demo FC vs Test United".to_string(),
            selection: "Demo FC".to_string(),
            odds_detect: 2.10,
            ev_pct,
            latency_ms: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// Per-market routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    Live,
    Demo,
    #[default]
    Off,
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Live => "live",
            MarketMode::Demo => "demo",
            MarketMode::Off => "off",
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MarketMode {
    type Err = ValbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(MarketMode::Live),
            "demo" => Ok(MarketMode::Demo),
            "off" => Ok(MarketMode::Off),
            other => Err(ValbotError::Config(format!("unknown market mode: {other}"))),
        }
    }
}

/// Global execution mode. `dryrun` is accepted as an alias of `demo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Live,
    #[default]
    #[serde(alias = "dryrun")]
    Demo,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Live => write!(f, "live"),
            ExecutionMode::Demo => write!(f, "demo"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Crate-level errors outside the broker and audit paths.
#[derive(Debug, thiserror::Error)]
pub enum ValbotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_mode_parse() {
        assert_eq!("LIVE".parse::<MarketMode>().unwrap(), MarketMode::Live);
        assert_eq!("demo".parse::<MarketMode>().unwrap(), MarketMode::Demo);
        assert_eq!("Off".parse::<MarketMode>().unwrap(), MarketMode::Off);
        assert!("paper".parse::<MarketMode>().is_err());
    }

    #[test]
    fn test_market_mode_default_is_off() {
        assert_eq!(MarketMode::default(), MarketMode::Off);
    }

    #[test]
    fn test_execution_mode_accepts_dryrun_alias() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ExecutionMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "dryrun""#).unwrap();
        assert_eq!(w.mode, ExecutionMode::Demo);
        let w: Wrapper = toml::from_str(r#"mode = "live""#).unwrap();
        assert_eq!(w.mode, ExecutionMode::Live);
    }

    #[test]
    fn test_candidate_from_feed_json() {
        let json = r#"{
            "market": "1X2",
            "match": "Demo FC vs Test United",
            "selection": "Demo FC",
            "odds_detect": 2.10,
            "ev_pct": 5.2,
            "latency_ms": 50
        }"#;
        let c: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(c.market, "1X2");
        assert_eq!(c.match_label, "Demo FC vs Test United");
        assert_eq!(c.latency_ms, 50);
        assert!((c.ev_pct - 5.2).abs() < 1e-12);
    }

    #[test]
    fn test_candidate_validation() {
        assert!(Candidate::sample("1X2", 5.2).validate().is_ok());

        let mut bad_odds = Candidate::sample("1X2", 5.2);
        bad_odds.odds_detect = 0.0;
        assert!(bad_odds.validate().is_err());

        let mut bad_ev = Candidate::sample("1X2", 5.2);
        bad_ev.ev_pct = f64::NAN;
        assert!(bad_ev.validate().is_err());

        assert!(Candidate::sample("  ", 5.2).validate().is_err());
    }

    #[test]
    fn test_candidate_display() {
        let c = Candidate::sample("1X2", 5.2);
        assert_eq!(
            c.to_string(),
            "[1X2] Demo FC vs Test United | Demo FC @ 2.1 | EV 5.2%"
        );
    }
}
