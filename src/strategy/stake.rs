//! Stake sizing.
//!
//! Base stake from bankroll (or a fixed amount), then the per-market
//! multiplier clamped by the global safety ceiling. All amounts are rounded
//! to the currency minor unit (2 dp).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Sized stake with the intermediate values kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedStake {
    pub base: Decimal,
    pub stake: Decimal,
    /// The safety ceiling, not the market multiplier, set the amount.
    pub capped: bool,
}

/// Stake before multipliers: the fixed stake when configured (and
/// positive), else `bankroll * stake_percent / 100` rounded to 2 dp.
pub fn base_stake(bankroll: Decimal, stake_percent: Decimal, fixed: Option<Decimal>) -> Decimal {
    match fixed {
        Some(f) if f > Decimal::ZERO => f,
        _ => (bankroll * stake_percent / dec!(100)).round_dp(2),
    }
}

/// Apply the market multiplier, then clamp to `base * max_multiplier`.
///
/// The clamp is taken on the multiplied value, never by re-deriving from a
/// capped base.
pub fn size_stake(base: Decimal, multiplier: Decimal, max_multiplier: Decimal) -> SizedStake {
    let multiplied = base * multiplier;
    let ceiling = base * max_multiplier;
    let capped = multiplied > ceiling;
    let stake = multiplied.min(ceiling).round_dp(2);

    if capped {
        debug!(
            base = %base,
            multiplier = %multiplier,
            max_multiplier = %max_multiplier,
            stake = %stake,
            "Stake clamped by safety ceiling"
        );
    }

    SizedStake {
        base,
        stake,
        capped,
    }
}

/// Advisory worst-case daily exposure: one stake per allowed bet.
pub fn daily_exposure(stake: Decimal, bet_limit_per_day: u32) -> Decimal {
    stake * Decimal::from(bet_limit_per_day)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
