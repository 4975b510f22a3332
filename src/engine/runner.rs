//! Host loop: one candidate in, decision and audit rows out.
//!
//! Wraps the stateless decision engine with the pieces that need state:
//! the broker session (live-market gate and order submission), the audit
//! sink and the per-day near-miss quota.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::config::ConfigSnapshot;
use crate::platforms::session::{Credentials, SessionManager};
use crate::storage::{AuditRecord, AuditSink, BetRecord, RecordKind};
use crate::strategy::params::ResolvedParams;
use crate::strategy::{attempt_record, Decision, DecisionEngine, Evaluation, SkipReason};
use crate::types::{Candidate, ValbotError};

// ---------------------------------------------------------------------------
// Order submission
// ---------------------------------------------------------------------------

/// Broker acknowledgement of a live order.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub odds_exec: f64,
    pub tx_id: String,
}

/// Places live orders with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    async fn submit(&self, bet: &BetRecord, credentials: &Credentials) -> Result<Fill>;
}

// ---------------------------------------------------------------------------
// Near-miss quota
// ---------------------------------------------------------------------------

/// Counter that resets on each new UTC day.
#[derive(Debug, Default)]
struct DailyQuota {
    day: Option<NaiveDate>,
    used: u32,
}

impl DailyQuota {
    /// Take one slot for `at`'s day. `limit == 0` means unlimited.
    fn try_take(&mut self, at: DateTime<Utc>, limit: u32) -> bool {
        let day = at.date_naive();
        if self.day != Some(day) {
            self.day = Some(day);
            self.used = 0;
        }
        if limit > 0 && self.used >= limit {
            return false;
        }
        self.used = self.used.saturating_add(1);
        true
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner<S: AuditSink> {
    session: SessionManager,
    audit: S,
    submitter: Option<Box<dyn OrderSubmitter>>,
    near_miss_quota: DailyQuota,
}

impl<S: AuditSink> Runner<S> {
    pub fn new(session: SessionManager, audit: S) -> Self {
        Self {
            session,
            audit,
            submitter: None,
            near_miss_quota: DailyQuota::default(),
        }
    }

    /// Route live decisions through `submitter`. Without one, live bets are
    /// recorded at the detected odds with no transaction id.
    pub fn with_submitter(mut self, submitter: Box<dyn OrderSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    pub fn audit(&self) -> &S {
        &self.audit
    }

    /// Keep the broker session usable. Failures leave the runner degraded:
    /// live markets are gated until a later refresh succeeds.
    pub async fn refresh_session(&mut self, max_age_secs: Option<u64>) -> bool {
        match self.session.ensure_alive(max_age_secs).await {
            Ok(true) => {
                self.session.record_probe();
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "Broker session unavailable — live markets gated");
            }
        }
        self.session.is_authenticated()
    }

    pub async fn process(
        &mut self,
        candidate: &Candidate,
        config: &ConfigSnapshot<'_>,
    ) -> Result<Decision, ValbotError> {
        self.process_at(candidate, config, Utc::now()).await
    }

    /// Evaluate `candidate`, settle live orders and append the audit rows.
    ///
    /// Invalid candidates get a single `SKIPPED` attempt row and are returned
    /// as errors. Audit failures are logged and never change the returned
    /// decision.
    pub async fn process_at(
        &mut self,
        candidate: &Candidate,
        config: &ConfigSnapshot<'_>,
        at: DateTime<Utc>,
    ) -> Result<Decision, ValbotError> {
        let params = ResolvedParams::resolve(&candidate.market, config);

        if let Err(e) = candidate.validate() {
            warn!(error = %e, "Invalid candidate skipped");
            let skipped = rejected(candidate, &params, SkipReason::InvalidCandidate, at);
            self.write_records(&skipped.records);
            return Err(e);
        }

        let mut eval = DecisionEngine::evaluate_resolved(candidate, &params, at);

        if matches!(eval.decision, Decision::LiveBet { .. }) {
            self.settle_live(candidate, &params, &mut eval, at).await;
        }

        if eval.near_miss().is_some()
            && !self
                .near_miss_quota
                .try_take(at, config.near_miss.max_records_per_day)
        {
            debug!(
                market = %candidate.market,
                limit = config.near_miss.max_records_per_day,
                "Near-miss daily cap reached — record dropped"
            );
            eval.records.retain(|r| r.kind() != RecordKind::NearMiss);
        }

        self.write_records(&eval.records);
        Ok(eval.decision)
    }

    async fn settle_live(
        &mut self,
        candidate: &Candidate,
        params: &ResolvedParams,
        eval: &mut Evaluation,
        at: DateTime<Utc>,
    ) {
        let credentials = match self.session.auth_params() {
            Ok(c) => c.clone(),
            Err(_) => {
                warn!(market = %candidate.market, "Live candidate skipped — API not authenticated");
                *eval = rejected(candidate, params, SkipReason::Unauthenticated, at);
                return;
            }
        };

        let Some(ref submitter) = self.submitter else {
            return;
        };
        let Some(bet) = eval.bet().cloned() else {
            return;
        };

        match submitter.submit(&bet, &credentials).await {
            Ok(fill) => {
                info!(
                    market = %bet.market,
                    selection = %bet.selection,
                    stake = %bet.stake_eur,
                    odds_detect = bet.odds_detect,
                    odds_exec = fill.odds_exec,
                    tx_id = %fill.tx_id,
                    "Live order filled"
                );
                if let Some(record) = eval.bet_mut() {
                    record.odds_exec = fill.odds_exec;
                    record.tx_id = Some(fill.tx_id).filter(|t| !t.is_empty());
                }
            }
            Err(e) => {
                error!(market = %bet.market, error = %e, "Live order failed");
                *eval = rejected(candidate, params, SkipReason::OrderRejected, at);
            }
        }
    }

    fn write_records(&mut self, records: &[AuditRecord]) {
        for record in records {
            if let Err(e) = self.audit.append(record) {
                error!(kind = %record.kind(), error = %e, "Failed to append audit record");
            }
        }
    }
}

/// A single `SKIPPED` attempt for a candidate the engine could not carry
/// through: invalid input, or a live decision refused after evaluation.
fn rejected(
    candidate: &Candidate,
    params: &ResolvedParams,
    reason: SkipReason,
    at: DateTime<Utc>,
) -> Evaluation {
    let decision = Decision::Skipped {
        reason,
        ev_floor: Some(params.ev_floor),
        distance: None,
        near_miss: false,
    };
    let attempt = attempt_record(candidate, params.market_mode, &decision, at);
    Evaluation {
        decision,
        records: vec![AuditRecord::Attempt(attempt)],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, SAMPLE_TOML};
    use crate::platforms::asianodds::{LoginResponse, LoginResult};
    use crate::platforms::{LoginReply, MockLoginTransport};
    use crate::storage::{AttemptOutcome, AuditError};
    use crate::types::MarketMode;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use secrecy::SecretString;

    /// In-memory sink; optionally fails every append.
    #[derive(Default)]
    struct MemorySink {
        records: Vec<AuditRecord>,
        fail: bool,
    }

    impl AuditSink for MemorySink {
        fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
            if self.fail {
                return Err(AuditError::Io {
                    path: "memory".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.records.push(record.clone());
            Ok(())
        }
    }

    impl MemorySink {
        fn kinds(&self) -> Vec<RecordKind> {
            self.records.iter().map(AuditRecord::kind).collect()
        }
    }

    fn config() -> AppConfig {
        AppConfig::from_toml(SAMPLE_TOML).unwrap()
    }

    fn session(succeeds: bool) -> SessionManager {
        let mut transport = MockLoginTransport::new();
        transport.expect_login().returning(move |_, _, _| {
            if succeeds {
                Ok(LoginReply {
                    response: LoginResponse {
                        code: 0,
                        result: Some(LoginResult {
                            key: Some("key-1".into()),
                            token: Some("tok-1".into()),
                            url: Some("https://session.example".into()),
                            ..Default::default()
                        }),
                    },
                    latency_ms: 12,
                })
            } else {
                Err(crate::platforms::AttemptError::Transport("connection refused".into()))
            }
        });
        SessionManager::with_transport(
            "https://broker.example",
            "valsystem",
            SecretString::new("5f4dcc3b5aa765d61d8327deb882cf99".into()),
            true,
            Box::new(transport),
        )
        .with_retry_policy(crate::platforms::session::RetryPolicy {
            retries: 1,
            backoff_secs: 0.0,
        })
    }

    async fn runner(authenticated: bool) -> Runner<MemorySink> {
        let mut runner = Runner::new(session(authenticated), MemorySink::default());
        assert_eq!(runner.refresh_session(None).await, authenticated);
        runner
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_live_bet_without_submitter_keeps_detected_odds() {
        let cfg = config();
        let mut r = runner(true).await;
        let d = r
            .process(&Candidate::sample("1X2", 5.2), &cfg.snapshot())
            .await
            .unwrap();
        assert_eq!(d.stake(), Some(dec!(2.51)));
        assert_eq!(r.audit().kinds(), vec![RecordKind::Attempt, RecordKind::Bet]);
        match &r.audit().records[1] {
            AuditRecord::Bet(b) => {
                assert_eq!(b.odds_exec, 2.10);
                assert_eq!(b.tx_id, None);
            }
            other => panic!("expected bet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_live_market_gated_when_unauthenticated() {
        let cfg = config();
        let mut r = runner(false).await;
        let d = r
            .process(&Candidate::sample("1X2", 6.0), &cfg.snapshot())
            .await
            .unwrap();
        assert!(matches!(
            d,
            Decision::Skipped {
                reason: SkipReason::Unauthenticated,
                ..
            }
        ));
        assert_eq!(r.audit().kinds(), vec![RecordKind::Attempt]);
        match &r.audit().records[0] {
            AuditRecord::Attempt(a) => {
                assert_eq!(a.decision, AttemptOutcome::Skipped);
                assert_eq!(a.reason, "API not authenticated");
                assert_eq!(a.mode, MarketMode::Live);
            }
            other => panic!("expected attempt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_demo_market_unaffected_by_session() {
        let cfg = config();
        let mut r = runner(false).await;
        let d = r
            .process(&Candidate::sample("O/U_2.5", 6.0), &cfg.snapshot())
            .await
            .unwrap();
        assert!(matches!(d, Decision::DemoBet { .. }));
        assert_eq!(r.audit().kinds(), vec![RecordKind::Attempt, RecordKind::Bet]);
    }

    #[tokio::test]
    async fn test_submitter_fill_lands_in_bet_record() {
        let cfg = config();
        let mut submitter = MockOrderSubmitter::new();
        submitter
            .expect_submit()
            .withf(|bet, creds| bet.stake_eur == dec!(2.51) && creds.token == "tok-1")
            .times(1)
            .returning(|_, _| {
                Ok(Fill {
                    odds_exec: 2.08,
                    tx_id: "TX-981".into(),
                })
            });

        let mut r = runner(true).await.with_submitter(Box::new(submitter));
        r.process(&Candidate::sample("1X2", 5.2), &cfg.snapshot())
            .await
            .unwrap();

        let bet = r
            .audit()
            .records
            .iter()
            .find_map(|rec| match rec {
                AuditRecord::Bet(b) => Some(b),
                _ => None,
            })
            .unwrap();
        assert_eq!(bet.odds_detect, 2.10);
        assert_eq!(bet.odds_exec, 2.08);
        assert_eq!(bet.tx_id.as_deref(), Some("TX-981"));
    }

    #[tokio::test]
    async fn test_submitter_failure_becomes_skip() {
        let cfg = config();
        let mut submitter = MockOrderSubmitter::new();
        submitter
            .expect_submit()
            .returning(|_, _| Err(anyhow!("market suspended")));

        let mut r = runner(true).await.with_submitter(Box::new(submitter));
        let d = r
            .process(&Candidate::sample("1X2", 5.2), &cfg.snapshot())
            .await
            .unwrap();
        assert!(!d.is_bet());
        assert_eq!(r.audit().kinds(), vec![RecordKind::Attempt]);
    }

    #[tokio::test]
    async fn test_submitter_not_called_for_demo() {
        let cfg = config();
        let mut submitter = MockOrderSubmitter::new();
        submitter.expect_submit().times(0);

        let mut r = runner(true).await.with_submitter(Box::new(submitter));
        r.process(&Candidate::sample("O/U_2.5", 6.0), &cfg.snapshot())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_candidate_writes_skipped_attempt() {
        let cfg = config();
        let mut r = runner(true).await;
        let mut c = Candidate::sample("1X2", 6.0);
        c.odds_detect = f64::NAN;
        assert!(r.process(&c, &cfg.snapshot()).await.is_err());

        let mut empty = Candidate::sample("", 6.0);
        empty.match_label = "No market".into();
        assert!(r.process(&empty, &cfg.snapshot()).await.is_err());

        assert_eq!(r.audit().kinds(), vec![RecordKind::Attempt, RecordKind::Attempt]);
        match (&r.audit().records[0], &r.audit().records[1]) {
            (AuditRecord::Attempt(nan_odds), AuditRecord::Attempt(no_market)) => {
                assert_eq!(nan_odds.decision, AttemptOutcome::Skipped);
                assert_eq!(nan_odds.reason, "invalid candidate");
                assert_eq!(nan_odds.mode, MarketMode::Live);
                assert_eq!(no_market.reason, "invalid candidate");
                assert_eq!(no_market.mode, MarketMode::Off);
            }
            other => panic!("expected attempts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_audit_failure_still_returns_decision() {
        let cfg = config();
        let mut r = Runner::new(
            session(true),
            MemorySink {
                fail: true,
                ..Default::default()
            },
        );
        r.refresh_session(None).await;
        let d = r
            .process(&Candidate::sample("1X2", 5.2), &cfg.snapshot())
            .await
            .unwrap();
        assert_eq!(d.stake(), Some(dec!(2.51)));
    }

    #[tokio::test]
    async fn test_near_miss_daily_cap() {
        let mut cfg = config();
        cfg.near_miss.max_records_per_day = 2;
        let mut r = runner(true).await;
        let c = Candidate::sample("1X2", 4.8);

        for _ in 0..3 {
            r.process_at(&c, &cfg.snapshot(), noon()).await.unwrap();
        }
        let count = |r: &Runner<MemorySink>| {
            r.audit()
                .kinds()
                .into_iter()
                .filter(|k| *k == RecordKind::NearMiss)
                .count()
        };
        assert_eq!(count(&r), 2);
        // Attempts are never capped.
        assert_eq!(r.audit().records.len(), 2 + 3);

        // New UTC day resets the quota.
        r.process_at(&c, &cfg.snapshot(), noon() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(count(&r), 3);
    }

    #[tokio::test]
    async fn test_near_miss_cap_zero_is_unlimited() {
        let mut cfg = config();
        cfg.near_miss.max_records_per_day = 0;
        let mut r = runner(true).await;
        for _ in 0..5 {
            r.process_at(&Candidate::sample("1X2", 4.8), &cfg.snapshot(), noon())
                .await
                .unwrap();
        }
        let near_misses = r
            .audit()
            .kinds()
            .into_iter()
            .filter(|k| *k == RecordKind::NearMiss)
            .count();
        assert_eq!(near_misses, 5);
    }

    #[test]
    fn test_daily_quota_unlimited_saturates() {
        let mut q = DailyQuota {
            day: Some(noon().date_naive()),
            used: u32::MAX,
        };
        assert!(q.try_take(noon(), 0));
        assert_eq!(q.used, u32::MAX);
        assert!(!q.try_take(noon(), 5));
    }

    #[test]
    fn test_daily_quota_resets() {
        let mut q = DailyQuota::default();
        assert!(q.try_take(noon(), 1));
        assert!(!q.try_take(noon(), 1));
        assert!(q.try_take(noon() + Duration::hours(12), 1));
    }
}
