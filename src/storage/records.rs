//! Audit record variants and their fixed column schemas.
//!
//! Column order is part of the on-disk contract read by external viewers.
//! Changing it requires bumping `SCHEMA_VERSION`.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

use crate::types::MarketMode;

pub const SCHEMA_VERSION: u32 = 1;

pub const ATTEMPT_COLUMNS: [&str; 10] = [
    "timestamp",
    "market",
    "mode",
    "match",
    "selection",
    "odds_detect",
    "ev_pct",
    "decision",
    "reason",
    "latency_ms",
];

pub const NEAR_MISS_COLUMNS: [&str; 12] = [
    "timestamp",
    "market",
    "mode",
    "match",
    "selection",
    "ev_floor",
    "ev_seen",
    "odds_seen",
    "stake_needed",
    "liquidity_seen",
    "reason",
    "distance",
];

pub const BET_COLUMNS: [&str; 12] = [
    "timestamp",
    "market",
    "mode",
    "match",
    "selection",
    "odds_detect",
    "odds_exec",
    "ev_pct",
    "stake_eur",
    "result",
    "pnl_eur",
    "tx_id",
];

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Attempt,
    NearMiss,
    Bet,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Attempt, RecordKind::NearMiss, RecordKind::Bet];

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Attempt => &ATTEMPT_COLUMNS,
            RecordKind::NearMiss => &NEAR_MISS_COLUMNS,
            RecordKind::Bet => &BET_COLUMNS,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Attempt => write!(f, "attempt"),
            RecordKind::NearMiss => write!(f, "near_miss"),
            RecordKind::Bet => write!(f, "bet"),
        }
    }
}

/// The `decision` column of an attempt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptOutcome {
    Skipped,
    DemoBet,
    LiveBet,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Skipped => "SKIPPED",
            AttemptOutcome::DemoBet => "DEMO_BET",
            AttemptOutcome::LiveBet => "LIVE_BET",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SKIPPED" => Ok(AttemptOutcome::Skipped),
            "DEMO_BET" => Ok(AttemptOutcome::DemoBet),
            "LIVE_BET" => Ok(AttemptOutcome::LiveBet),
            other => Err(format!("unknown decision {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row per evaluated candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub market: String,
    pub mode: MarketMode,
    pub match_label: String,
    pub selection: String,
    pub odds_detect: f64,
    pub ev_pct: f64,
    pub decision: AttemptOutcome,
    pub reason: String,
    pub latency_ms: u64,
}

/// A candidate that missed the EV floor by less than the near-miss window.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMissRecord {
    pub timestamp: DateTime<Utc>,
    pub market: String,
    pub mode: MarketMode,
    pub match_label: String,
    pub selection: String,
    pub ev_floor: f64,
    pub ev_seen: f64,
    pub odds_seen: f64,
    pub stake_needed: Option<Decimal>,
    pub liquidity_seen: Option<f64>,
    pub reason: String,
    pub distance: f64,
}

/// A demo or live stake.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRecord {
    pub timestamp: DateTime<Utc>,
    pub market: String,
    /// Effective mode: `demo` whenever either the market or the global
    /// execution mode is demo.
    pub mode: MarketMode,
    pub match_label: String,
    pub selection: String,
    pub odds_detect: f64,
    pub odds_exec: f64,
    pub ev_pct: f64,
    pub stake_eur: Decimal,
    /// Settlement fields, filled by downstream tooling.
    pub result: Option<String>,
    pub pnl_eur: Option<Decimal>,
    pub tx_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditRecord {
    Attempt(AttemptRecord),
    NearMiss(NearMissRecord),
    Bet(BetRecord),
}

impl AuditRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            AuditRecord::Attempt(_) => RecordKind::Attempt,
            AuditRecord::NearMiss(_) => RecordKind::NearMiss,
            AuditRecord::Bet(_) => RecordKind::Bet,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::Attempt(r) => r.timestamp,
            AuditRecord::NearMiss(r) => r.timestamp,
            AuditRecord::Bet(r) => r.timestamp,
        }
    }

    /// Field values in schema column order.
    pub fn to_row(&self) -> Vec<String> {
        match self {
            AuditRecord::Attempt(r) => vec![
                fmt_ts(&r.timestamp),
                r.market.clone(),
                r.mode.to_string(),
                r.match_label.clone(),
                r.selection.clone(),
                r.odds_detect.to_string(),
                r.ev_pct.to_string(),
                r.decision.to_string(),
                r.reason.clone(),
                r.latency_ms.to_string(),
            ],
            AuditRecord::NearMiss(r) => vec![
                fmt_ts(&r.timestamp),
                r.market.clone(),
                r.mode.to_string(),
                r.match_label.clone(),
                r.selection.clone(),
                r.ev_floor.to_string(),
                r.ev_seen.to_string(),
                r.odds_seen.to_string(),
                fmt_opt(&r.stake_needed),
                fmt_opt(&r.liquidity_seen),
                r.reason.clone(),
                r.distance.to_string(),
            ],
            AuditRecord::Bet(r) => vec![
                fmt_ts(&r.timestamp),
                r.market.clone(),
                r.mode.to_string(),
                r.match_label.clone(),
                r.selection.clone(),
                r.odds_detect.to_string(),
                r.odds_exec.to_string(),
                r.ev_pct.to_string(),
                r.stake_eur.to_string(),
                fmt_opt(&r.result),
                fmt_opt(&r.pnl_eur),
                fmt_opt(&r.tx_id),
            ],
        }
    }

    /// Rebuild a record from a data row of the given kind.
    pub fn from_row(kind: RecordKind, row: &[String]) -> Result<Self, String> {
        let expected = kind.columns().len();
        if row.len() != expected {
            return Err(format!("expected {expected} fields, found {}", row.len()));
        }
        let mut f = Fields { row, idx: 0, kind };

        let record = match kind {
            RecordKind::Attempt => AuditRecord::Attempt(AttemptRecord {
                timestamp: f.timestamp()?,
                market: f.text(),
                mode: f.parse()?,
                match_label: f.text(),
                selection: f.text(),
                odds_detect: f.parse()?,
                ev_pct: f.parse()?,
                decision: f.parse_with(|s| s.parse::<AttemptOutcome>())?,
                reason: f.text(),
                latency_ms: f.parse()?,
            }),
            RecordKind::NearMiss => AuditRecord::NearMiss(NearMissRecord {
                timestamp: f.timestamp()?,
                market: f.text(),
                mode: f.parse()?,
                match_label: f.text(),
                selection: f.text(),
                ev_floor: f.parse()?,
                ev_seen: f.parse()?,
                odds_seen: f.parse()?,
                stake_needed: f.optional()?,
                liquidity_seen: f.optional()?,
                reason: f.text(),
                distance: f.parse()?,
            }),
            RecordKind::Bet => AuditRecord::Bet(BetRecord {
                timestamp: f.timestamp()?,
                market: f.text(),
                mode: f.parse()?,
                match_label: f.text(),
                selection: f.text(),
                odds_detect: f.parse()?,
                odds_exec: f.parse()?,
                ev_pct: f.parse()?,
                stake_eur: f.parse()?,
                result: f.optional_text(),
                pnl_eur: f.optional()?,
                tx_id: f.optional_text(),
            }),
        };
        Ok(record)
    }
}

impl From<AttemptRecord> for AuditRecord {
    fn from(r: AttemptRecord) -> Self {
        AuditRecord::Attempt(r)
    }
}

impl From<NearMissRecord> for AuditRecord {
    fn from(r: NearMissRecord) -> Self {
        AuditRecord::NearMiss(r)
    }
}

impl From<BetRecord> for AuditRecord {
    fn from(r: BetRecord) -> Self {
        AuditRecord::Bet(r)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

fn fmt_opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Cursor over a data row that names the failing column in errors.
struct Fields<'a> {
    row: &'a [String],
    idx: usize,
    kind: RecordKind,
}

impl<'a> Fields<'a> {
    fn next_raw(&mut self) -> (&'a str, &'static str) {
        let column = self.kind.columns()[self.idx];
        let row: &'a [String] = self.row;
        let value = row[self.idx].as_str();
        self.idx += 1;
        (value, column)
    }

    fn text(&mut self) -> String {
        self.next_raw().0.to_string()
    }

    fn optional_text(&mut self) -> Option<String> {
        let (value, _) = self.next_raw();
        (!value.is_empty()).then(|| value.to_string())
    }

    fn parse_with<T, E: fmt::Display>(
        &mut self,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, String> {
        let (value, column) = self.next_raw();
        parse(value).map_err(|e| format!("column {column}: {e}"))
    }

    fn parse<T>(&mut self) -> Result<T, String>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.parse_with(|s| s.parse::<T>())
    }

    fn optional<T>(&mut self) -> Result<Option<T>, String>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.parse_with(|s| {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<T>().map(Some)
            }
        })
    }

    fn timestamp(&mut self) -> Result<DateTime<Utc>, String> {
        self.parse_with(|s| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
