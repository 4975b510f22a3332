//! Startup Go/No-Go check.
//!
//! Summarises the staking setup before the first candidate is evaluated.
//! Issues block trading (`NO-GO`); cautions are reported but do not.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::storage::AuditError;
use crate::strategy::stake;
use crate::types::MarketMode;

const MIN_SANE_STAKE_PCT: Decimal = dec!(0.5);
const MAX_SANE_STAKE_PCT: Decimal = dec!(3.5);
const MIN_SANE_EV_FLOOR: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Go,
    GoWithCautions,
    NoGo,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Go => write!(f, "GO"),
            Verdict::GoWithCautions => write!(f, "GO (with cautions)"),
            Verdict::NoGo => write!(f, "NO-GO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightReport {
    pub bankroll: Decimal,
    pub base_stake: Decimal,
    /// Worst case if every allowed bet of the day is placed.
    pub daily_exposure: Decimal,
    pub authenticated: bool,
    pub issues: Vec<String>,
    pub cautions: Vec<String>,
}

impl PreflightReport {
    pub fn verdict(&self) -> Verdict {
        if !self.issues.is_empty() {
            Verdict::NoGo
        } else if !self.cautions.is_empty() {
            Verdict::GoWithCautions
        } else {
            Verdict::Go
        }
    }

    /// Emit the report through `tracing`.
    pub fn log(&self) {
        info!(
            bankroll = %self.bankroll,
            base_stake = %self.base_stake,
            daily_exposure = %self.daily_exposure,
            authenticated = self.authenticated,
            verdict = %self.verdict(),
            "Pre-flight check"
        );
        for issue in &self.issues {
            warn!(issue = %issue, "Pre-flight issue");
        }
        for caution in &self.cautions {
            warn!(caution = %caution, "Pre-flight caution");
        }
    }
}

/// Build the report from the loaded configuration, the session state and
/// the outcome of an audit writability probe.
pub fn run(
    config: &AppConfig,
    authenticated: bool,
    audit_writable: Result<(), AuditError>,
) -> PreflightReport {
    let exec = &config.execution;
    let bankroll = config.bankroll.starting_bankroll_eur;
    let base_stake = stake::base_stake(bankroll, exec.stake_percent, exec.fixed_stake_eur);
    let daily_exposure = stake::daily_exposure(base_stake, exec.bet_limit_per_day);

    let mut issues = Vec::new();
    let mut cautions = Vec::new();

    if bankroll <= Decimal::ZERO {
        issues.push(format!("bankroll must be positive (got €{bankroll})"));
    }
    if base_stake <= Decimal::ZERO {
        issues.push(format!("stake must be positive (got €{base_stake})"));
    }
    if !authenticated {
        issues.push("broker API not authenticated".to_string());
    }
    if let Err(e) = audit_writable {
        issues.push(format!("audit logs not writable: {e}"));
    }

    let fixed = exec.fixed_stake_eur.is_some_and(|f| f > Decimal::ZERO);
    if !fixed && !(MIN_SANE_STAKE_PCT..=MAX_SANE_STAKE_PCT).contains(&exec.stake_percent) {
        cautions.push(format!(
            "stake_percent {}% outside {MIN_SANE_STAKE_PCT}–{MAX_SANE_STAKE_PCT}%",
            exec.stake_percent
        ));
    }

    if bankroll > Decimal::ZERO {
        let ratio = daily_exposure / bankroll;
        if ratio > config.safety.daily_exposure_cap {
            cautions.push(format!(
                "daily exposure €{daily_exposure} is {:.1}% of bankroll (cap {:.1}%)",
                ratio * dec!(100),
                config.safety.daily_exposure_cap * dec!(100)
            ));
        }
    }

    if exec.ev_floor_percent < MIN_SANE_EV_FLOOR {
        cautions.push(format!(
            "global EV floor {:.2}% below {MIN_SANE_EV_FLOOR:.0}%",
            exec.ev_floor_percent
        ));
    }
    let mut low_floor_markets: Vec<&str> = config
        .markets
        .iter()
        .filter(|(_, m)| m.mode != MarketMode::Off)
        .filter(|(_, m)| m.ev_floor.is_some_and(|f| f < MIN_SANE_EV_FLOOR))
        .map(|(id, _)| id.as_str())
        .collect();
    low_floor_markets.sort_unstable();
    for market in low_floor_markets {
        cautions.push(format!("market {market} EV floor below {MIN_SANE_EV_FLOOR:.0}%"));
    }

    PreflightReport {
        bankroll,
        base_stake,
        daily_exposure,
        authenticated,
        issues,
        cautions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SAMPLE_TOML;

    fn config() -> AppConfig {
        AppConfig::from_toml(SAMPLE_TOML).unwrap()
    }

    #[test]
    fn test_sample_is_go() {
        let report = run(&config(), true, Ok(()));
        assert_eq!(report.base_stake, dec!(2.51));
        assert_eq!(report.daily_exposure, dec!(2.51));
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert!(report.cautions.is_empty(), "{:?}", report.cautions);
        assert_eq!(report.verdict(), Verdict::Go);
    }

    #[test]
    fn test_unauthenticated_is_no_go() {
        let report = run(&config(), false, Ok(()));
        assert_eq!(report.verdict(), Verdict::NoGo);
        assert!(report.issues.iter().any(|i| i.contains("not authenticated")));
    }

    #[test]
    fn test_unwritable_audit_is_no_go() {
        let err = AuditError::Io {
            path: "/nope/attempt_log.csv".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        let report = run(&config(), true, Err(err));
        assert_eq!(report.verdict(), Verdict::NoGo);
        assert!(report.issues[0].starts_with("audit logs not writable"));
    }

    #[test]
    fn test_zero_stake_is_no_go() {
        let mut cfg = config();
        cfg.execution.stake_percent = Decimal::ZERO;
        let report = run(&cfg, true, Ok(()));
        assert_eq!(report.verdict(), Verdict::NoGo);
    }

    #[test]
    fn test_exposure_above_cap_is_caution() {
        let mut cfg = config();
        // 2.51 * 10 = 25.10 -> 25% of 100.45
        cfg.execution.bet_limit_per_day = 10;
        let report = run(&cfg, true, Ok(()));
        assert_eq!(report.daily_exposure, dec!(25.10));
        assert_eq!(report.verdict(), Verdict::GoWithCautions);
        assert_eq!(report.cautions.len(), 1);
    }

    #[test]
    fn test_aggressive_stake_percent_is_caution() {
        let mut cfg = config();
        cfg.execution.stake_percent = dec!(5);
        let report = run(&cfg, true, Ok(()));
        assert!(report.cautions.iter().any(|c| c.contains("stake_percent")));
        assert_eq!(report.verdict(), Verdict::GoWithCautions);
    }

    #[test]
    fn test_fixed_stake_skips_percent_caution() {
        let mut cfg = config();
        cfg.execution.stake_percent = dec!(10);
        cfg.execution.fixed_stake_eur = Some(dec!(1));
        let report = run(&cfg, true, Ok(()));
        assert_eq!(report.base_stake, dec!(1));
        assert!(!report.cautions.iter().any(|c| c.contains("stake_percent")));
    }

    #[test]
    fn test_low_ev_floor_is_caution() {
        let mut cfg = config();
        cfg.execution.ev_floor_percent = 0.5;
        cfg.markets.get_mut("DNB").unwrap().ev_floor = Some(0.2);
        let report = run(&cfg, true, Ok(()));
        assert_eq!(report.cautions.len(), 2);
        assert!(report.cautions[1].contains("DNB"));
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Go.to_string(), "GO");
        assert_eq!(Verdict::GoWithCautions.to_string(), "GO (with cautions)");
        assert_eq!(Verdict::NoGo.to_string(), "NO-GO");
    }
}
