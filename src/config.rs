//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The broker password is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::{ExecutionMode, MarketMode, ValbotError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub execution: ExecutionConfig,
    pub bankroll: BankrollConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub near_miss: NearMissConfig,
    /// Per-market routing table, keyed by market id.
    #[serde(default)]
    pub markets: HashMap<String, MarketConfig>,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    pub name: String,
    pub api_url: String,
    pub username: String,
    /// Name of the env var holding the (pre-hashed) API password.
    pub password_env: String,
    /// The broker expects an MD5 digest rather than the raw password.
    #[serde(default = "default_true")]
    pub use_md5: bool,
    #[serde(default = "default_login_retries")]
    pub login_retries: u32,
    #[serde(default = "default_login_backoff")]
    pub login_backoff_secs: f64,
    /// Force a fresh login once the token is this old. Absent or 0 disables.
    #[serde(default)]
    pub token_max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    pub stake_percent: Decimal,
    /// Takes precedence over `stake_percent` when set.
    #[serde(default)]
    pub fixed_stake_eur: Option<Decimal>,
    pub ev_floor_percent: f64,
    #[serde(default = "default_bet_limit")]
    pub bet_limit_per_day: u32,
    #[serde(default)]
    pub audit_mode: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BankrollConfig {
    pub starting_bankroll_eur: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    /// Hard ceiling on the per-market stake multiplier.
    pub max_stake_multiplier: Decimal,
    /// Advisory cap on daily exposure as a fraction of bankroll.
    pub daily_exposure_cap: Decimal,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_stake_multiplier: dec!(1.5),
            daily_exposure_cap: dec!(0.15),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NearMissConfig {
    pub enabled: bool,
    pub ev_window_pct: f64,
    /// Reserved: not consulted by the EV gate.
    #[serde(default)]
    pub odds_tolerance: f64,
    /// Reserved: not consulted by the EV gate.
    #[serde(default)]
    pub min_liquidity_pct: f64,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_records_per_day: u32,
}

impl Default for NearMissConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ev_window_pct: 0.0,
            odds_tolerance: 0.0,
            min_liquidity_pct: 0.0,
            max_records_per_day: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MarketConfig {
    #[serde(default)]
    pub mode: MarketMode,
    /// Overrides `execution.ev_floor_percent` for this market.
    #[serde(default)]
    pub ev_floor: Option<f64>,
    #[serde(default = "default_multiplier")]
    pub stake_multiplier: Decimal,
}

impl MarketConfig {
    pub fn new(mode: MarketMode) -> Self {
        Self {
            mode,
            ev_floor: None,
            stake_multiplier: Decimal::ONE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub attempt_log: String,
    pub near_miss_log: String,
    pub bet_log: String,
    pub api_health_log: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            attempt_log: "logs/attempt_log.csv".into(),
            near_miss_log: "logs/near_miss_log.csv".into(),
            bet_log: "logs/bet_log.csv".into(),
            api_health_log: "logs/api_health.log".into(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_login_retries() -> u32 {
    3
}

fn default_login_backoff() -> f64 {
    1.0
}

fn default_bet_limit() -> u32 {
    1
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

/// Borrowed view of everything the decision engine reads.
///
/// Built fresh per evaluation so operator edits to the owning `AppConfig`
/// are picked up on the next candidate.
#[derive(Debug, Clone, Copy)]
pub struct ConfigSnapshot<'a> {
    pub markets: &'a HashMap<String, MarketConfig>,
    pub execution: &'a ExecutionConfig,
    pub safety: &'a SafetyConfig,
    pub near_miss: &'a NearMissConfig,
    pub bankroll: Decimal,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the decision engine cannot work with.
    pub fn validate(&self) -> Result<(), ValbotError> {
        if self.bankroll.starting_bankroll_eur <= Decimal::ZERO {
            return Err(ValbotError::Config("starting_bankroll_eur must be > 0".into()));
        }
        if self.execution.stake_percent < Decimal::ZERO {
            return Err(ValbotError::Config("stake_percent must be >= 0".into()));
        }
        if let Some(fixed) = self.execution.fixed_stake_eur {
            if fixed < Decimal::ZERO {
                return Err(ValbotError::Config("fixed_stake_eur must be >= 0".into()));
            }
        }
        if self.safety.max_stake_multiplier < Decimal::ZERO {
            return Err(ValbotError::Config("max_stake_multiplier must be >= 0".into()));
        }
        if self.near_miss.ev_window_pct < 0.0 {
            return Err(ValbotError::Config("near_miss.ev_window_pct must be >= 0".into()));
        }
        if self.broker.login_retries == 0 {
            return Err(ValbotError::Config("broker.login_retries must be >= 1".into()));
        }
        if !self.broker.login_backoff_secs.is_finite() || self.broker.login_backoff_secs < 0.0 {
            return Err(ValbotError::Config("broker.login_backoff_secs must be >= 0".into()));
        }
        for (market, cfg) in &self.markets {
            if cfg.stake_multiplier < Decimal::ZERO {
                return Err(ValbotError::Config(format!(
                    "markets.{market}.stake_multiplier must be >= 0"
                )));
            }
        }
        Ok(())
    }

    /// The configuration view consumed by the decision engine.
    pub fn snapshot(&self) -> ConfigSnapshot<'_> {
        ConfigSnapshot {
            markets: &self.markets,
            execution: &self.execution,
            safety: &self.safety,
            near_miss: &self.near_miss,
            bankroll: self.bankroll.starting_bankroll_eur,
        }
    }

    /// Resolve the broker password from the environment.
    pub fn broker_password(&self) -> Result<SecretString> {
        Self::resolve_env(&self.broker.password_env).map(SecretString::new)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_TOML: &str = r#"
[broker]
name = "Asianodds88"
api_url = "https://webapi.asianodds88.com/AsianOddsService"
username = "valsystem"
password_env = "VALBOT_TEST_PASSWORD"
use_md5 = true

[execution]
mode = "live"
stake_percent = 2.5
ev_floor_percent = 1.0
bet_limit_per_day = 1
audit_mode = true

[bankroll]
starting_bankroll_eur = 100.45

[safety]
max_stake_multiplier = 1.5
daily_exposure_cap = 0.15

[near_miss]
enabled = true
ev_window_pct = 0.5
odds_tolerance = 0.05
min_liquidity_pct = 50.0
max_records_per_day = 200

[markets."1X2"]
mode = "live"
ev_floor = 5.0

[markets."O/U_2.5"]
mode = "demo"
ev_floor = 5.0
stake_multiplier = 1.0

[markets.BTTS]
mode = "off"

[markets.DNB]
mode = "live"
ev_floor = 5.0
stake_multiplier = 1.25
"#;
