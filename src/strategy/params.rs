//! Per-candidate parameter resolution.
//!
//! Collapses the market table, global execution settings, safety caps and
//! near-miss settings into one fully-resolved set before any gating runs,
//! so the gates never deal with missing values.

use rust_decimal::Decimal;

use super::stake;
use crate::config::ConfigSnapshot;
use crate::types::{ExecutionMode, MarketMode};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    /// Routing mode from the market table (`off` when the market is absent).
    pub market_mode: MarketMode,
    pub execution_mode: ExecutionMode,
    /// Per-market override, else the global floor.
    pub ev_floor: f64,
    pub stake_multiplier: Decimal,
    pub max_stake_multiplier: Decimal,
    /// Stake before multiplier and cap.
    pub base_stake: Decimal,
    /// Near-miss window in EV percentage points; `None` when tracking is off.
    pub near_miss_window: Option<f64>,
}

impl ResolvedParams {
    pub fn resolve(market: &str, config: &ConfigSnapshot<'_>) -> Self {
        let market_cfg = config.markets.get(market);
        let exec = config.execution;

        Self {
            market_mode: market_cfg.map(|m| m.mode).unwrap_or_default(),
            execution_mode: exec.mode,
            ev_floor: market_cfg
                .and_then(|m| m.ev_floor)
                .unwrap_or(exec.ev_floor_percent),
            stake_multiplier: market_cfg
                .map(|m| m.stake_multiplier)
                .unwrap_or(Decimal::ONE),
            max_stake_multiplier: config.safety.max_stake_multiplier,
            base_stake: stake::base_stake(
                config.bankroll,
                exec.stake_percent,
                exec.fixed_stake_eur,
            ),
            near_miss_window: config
                .near_miss
                .enabled
                .then_some(config.near_miss.ev_window_pct),
        }
    }

    /// Where a bet on this market would go: `off`, `demo` if either the
    /// market or the global execution mode says demo, else `live`.
    pub fn effective_mode(&self) -> MarketMode {
        match (self.market_mode, self.execution_mode) {
            (MarketMode::Off, _) => MarketMode::Off,
            (MarketMode::Demo, _) | (_, ExecutionMode::Demo) => MarketMode::Demo,
            (MarketMode::Live, ExecutionMode::Live) => MarketMode::Live,
        }
    }
}
