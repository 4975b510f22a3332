//! Decision engine: market routing, EV gating, near-miss classification
//! and stake sizing.
//!
//! Stateless: every call receives the configuration snapshot it should use
//! and returns the decision together with the audit records to emit. The
//! engine never writes records itself.

pub mod params;
pub mod stake;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, info};

use crate::config::ConfigSnapshot;
use crate::storage::{AttemptOutcome, AttemptRecord, AuditRecord, BetRecord, NearMissRecord};
use crate::types::{Candidate, MarketMode};
use params::ResolvedParams;

/// Attempt `reason` written for candidates that proceed to a stake.
pub const PROCEEDED_REASON: &str = "proceeded";
/// Near-miss `reason` tag for EV-floor misses.
pub const NEAR_MISS_EV_TAG: &str = "ev";

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    MarketOff,
    EvBelowFloor,
    /// Live-bound candidate while the broker session is down.
    Unauthenticated,
    /// The broker refused or failed the live order.
    OrderRejected,
    /// The feed produced a candidate that cannot be evaluated.
    InvalidCandidate,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MarketOff => "market OFF",
            SkipReason::EvBelowFloor => "EV below floor",
            SkipReason::Unauthenticated => "API not authenticated",
            SkipReason::OrderRejected => "order rejected",
            SkipReason::InvalidCandidate => "invalid candidate",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skipped {
        reason: SkipReason,
        /// Floor applied, when the EV gate was reached.
        ev_floor: Option<f64>,
        /// `round(floor - ev, 3)` for EV skips.
        distance: Option<f64>,
        near_miss: bool,
    },
    /// Paper stake at the detected odds.
    DemoBet { stake: Decimal, ev_floor: f64, odds: f64 },
    /// Real stake; execution odds and transaction id come from the order
    /// submitter, not from the engine.
    LiveBet { stake: Decimal, ev_floor: f64 },
}

impl Decision {
    pub fn skipped(reason: SkipReason) -> Self {
        Decision::Skipped {
            reason,
            ev_floor: None,
            distance: None,
            near_miss: false,
        }
    }

    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Decision::Skipped { .. } => AttemptOutcome::Skipped,
            Decision::DemoBet { .. } => AttemptOutcome::DemoBet,
            Decision::LiveBet { .. } => AttemptOutcome::LiveBet,
        }
    }

    pub fn stake(&self) -> Option<Decimal> {
        match self {
            Decision::Skipped { .. } => None,
            Decision::DemoBet { stake, .. } | Decision::LiveBet { stake, .. } => Some(*stake),
        }
    }

    pub fn ev_floor(&self) -> Option<f64> {
        match self {
            Decision::Skipped { ev_floor, .. } => *ev_floor,
            Decision::DemoBet { ev_floor, .. } | Decision::LiveBet { ev_floor, .. } => {
                Some(*ev_floor)
            }
        }
    }

    pub fn is_bet(&self) -> bool {
        !matches!(self, Decision::Skipped { .. })
    }

    /// The attempt `reason` column.
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Skipped { reason, .. } => reason.as_str(),
            _ => PROCEEDED_REASON,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Skipped { reason, .. } => write!(f, "SKIPPED ({reason})"),
            Decision::DemoBet { stake, .. } => write!(f, "DEMO_BET €{stake}"),
            Decision::LiveBet { stake, .. } => write!(f, "LIVE_BET €{stake}"),
        }
    }
}

/// Engine output: the decision plus the records the caller must append.
///
/// Always exactly one attempt record; one near-miss record when the
/// candidate missed the floor inside the window; one bet record for
/// demo/live decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub records: Vec<AuditRecord>,
}

impl Evaluation {
    pub fn attempt(&self) -> Option<&AttemptRecord> {
        self.records.iter().find_map(|r| match r {
            AuditRecord::Attempt(a) => Some(a),
            _ => None,
        })
    }

    pub fn near_miss(&self) -> Option<&NearMissRecord> {
        self.records.iter().find_map(|r| match r {
            AuditRecord::NearMiss(n) => Some(n),
            _ => None,
        })
    }

    pub fn bet(&self) -> Option<&BetRecord> {
        self.records.iter().find_map(|r| match r {
            AuditRecord::Bet(b) => Some(b),
            _ => None,
        })
    }

    pub fn bet_mut(&mut self) -> Option<&mut BetRecord> {
        self.records.iter_mut().find_map(|r| match r {
            AuditRecord::Bet(b) => Some(b),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine;

impl DecisionEngine {
    /// Evaluate one candidate against a configuration snapshot.
    ///
    /// Steps:
    /// 1. Market gate: absent or `off` markets are skipped.
    /// 2. EV gate: `ev < floor` is skipped (equal passes); misses within the
    ///    near-miss window (inclusive) also yield a near-miss record.
    /// 3. Stake sizing: base stake × market multiplier, capped by
    ///    `base × max_stake_multiplier`.
    /// 4. Mode: demo if the market or the global mode says so, else live.
    pub fn evaluate(
        candidate: &Candidate,
        config: &ConfigSnapshot<'_>,
        at: DateTime<Utc>,
    ) -> Evaluation {
        let params = ResolvedParams::resolve(&candidate.market, config);
        Self::evaluate_resolved(candidate, &params, at)
    }

    /// Evaluate with parameters already resolved for `candidate.market`.
    pub fn evaluate_resolved(
        candidate: &Candidate,
        params: &ResolvedParams,
        at: DateTime<Utc>,
    ) -> Evaluation {
        // Step 1 – market gate
        if params.market_mode == MarketMode::Off {
            debug!(market = %candidate.market, "Market OFF — skipped");
            return Self::finish(candidate, params, Decision::skipped(SkipReason::MarketOff), at, None);
        }

        // Step 2 – EV gate
        let floor = params.ev_floor;
        if candidate.ev_pct < floor {
            let distance = round3(floor - candidate.ev_pct);
            // Compared on the rounded distance so edge values survive f64 subtraction.
            let near_miss = params
                .near_miss_window
                .is_some_and(|window| distance <= round3(window));

            let near_miss_record = near_miss.then(|| NearMissRecord {
                timestamp: at,
                market: candidate.market.clone(),
                mode: params.market_mode,
                match_label: candidate.match_label.clone(),
                selection: candidate.selection.clone(),
                ev_floor: floor,
                ev_seen: candidate.ev_pct,
                odds_seen: candidate.odds_detect,
                stake_needed: None,
                liquidity_seen: None,
                reason: NEAR_MISS_EV_TAG.to_string(),
                distance,
            });

            debug!(
                market = %candidate.market,
                ev = candidate.ev_pct,
                floor,
                distance,
                near_miss,
                "EV below floor — skipped"
            );

            let decision = Decision::Skipped {
                reason: SkipReason::EvBelowFloor,
                ev_floor: Some(floor),
                distance: Some(distance),
                near_miss,
            };
            return Self::finish(candidate, params, decision, at, near_miss_record);
        }

        // Step 3 – stake sizing
        let sized = stake::size_stake(
            params.base_stake,
            params.stake_multiplier,
            params.max_stake_multiplier,
        );

        // Step 4 – mode resolution
        let decision = match params.effective_mode() {
            MarketMode::Live => Decision::LiveBet {
                stake: sized.stake,
                ev_floor: floor,
            },
            _ => Decision::DemoBet {
                stake: sized.stake,
                ev_floor: floor,
                odds: candidate.odds_detect,
            },
        };

        info!(
            market = %candidate.market,
            selection = %candidate.selection,
            odds = candidate.odds_detect,
            ev = format!("{:.2}%", candidate.ev_pct),
            floor = format!("{floor:.2}%"),
            base = %sized.base,
            stake = %sized.stake,
            capped = sized.capped,
            decision = %decision,
            "Bet decided"
        );

        Self::finish(candidate, params, decision, at, None)
    }

    /// Attach the attempt record (and the bet record for stakes).
    fn finish(
        candidate: &Candidate,
        params: &ResolvedParams,
        decision: Decision,
        at: DateTime<Utc>,
        near_miss: Option<NearMissRecord>,
    ) -> Evaluation {
        let mut records = Vec::with_capacity(2);

        if let Some(nm) = near_miss {
            records.push(AuditRecord::NearMiss(nm));
        }

        records.push(AuditRecord::Attempt(attempt_record(candidate, params.market_mode, &decision, at)));

        if let Some(stake) = decision.stake() {
            records.push(AuditRecord::Bet(BetRecord {
                timestamp: at,
                market: candidate.market.clone(),
                mode: params.effective_mode(),
                match_label: candidate.match_label.clone(),
                selection: candidate.selection.clone(),
                odds_detect: candidate.odds_detect,
                odds_exec: candidate.odds_detect,
                ev_pct: candidate.ev_pct,
                stake_eur: stake,
                result: None,
                pnl_eur: None,
                tx_id: None,
            }));
        }

        Evaluation { decision, records }
    }
}

/// The attempt row for `decision` on `candidate`.
pub fn attempt_record(
    candidate: &Candidate,
    mode: MarketMode,
    decision: &Decision,
    at: DateTime<Utc>,
) -> AttemptRecord {
    AttemptRecord {
        timestamp: at,
        market: candidate.market.clone(),
        mode,
        match_label: candidate.match_label.clone(),
        selection: candidate.selection.clone(),
        odds_detect: candidate.odds_detect,
        ev_pct: candidate.ev_pct,
        decision: decision.outcome(),
        reason: decision.reason().to_string(),
        latency_ms: candidate.latency_ms,
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
