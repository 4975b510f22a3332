//! VALBOT value-bet decision loop
//!
//! Entry point. Loads configuration, initialises structured logging,
//! authenticates against the broker, runs the pre-flight check, then
//! evaluates candidates read as JSON lines from stdin until EOF or Ctrl+C.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use valbot::config;
use valbot::engine::preflight::{self, Verdict};
use valbot::engine::runner::Runner;
use valbot::platforms::session::{RetryPolicy, SessionManager};
use valbot::storage::CsvAuditLog;
use valbot::types::Candidate;

const BANNER: &str = r#"
 __      __     _      ____   ____ _______
 \ \    / /\   | |    |  _ \ / __ \__   __|
  \ \  / /  \  | |    | |_) | |  | | | |
   \ \/ / /\ \ | |    |  _ <| |  | | | |
    \  / ____ \| |____| |_) | |__| | | |
     \/_/    \_\______|____/ \____/  |_|

  Value-bet evaluation & staking
  v0.1.0
"#;

/// Tally of decisions for the shutdown summary.
#[derive(Debug, Default)]
struct RunStats {
    received: u64,
    invalid: u64,
    skipped: u64,
    bets: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        broker = %cfg.broker.name,
        mode = ?cfg.execution.mode,
        bankroll = %cfg.bankroll.starting_bankroll_eur,
        markets = cfg.markets.len(),
        "VALBOT starting up"
    );

    // -- Broker session --------------------------------------------------

    let password = cfg.broker_password()?;
    let retry_policy = RetryPolicy {
        retries: cfg.broker.login_retries,
        backoff_secs: cfg.broker.login_backoff_secs,
    };
    let mut session = SessionManager::new(
        &cfg.broker.api_url,
        &cfg.broker.username,
        password,
        cfg.broker.use_md5,
    )
    .context("Failed to build broker HTTP client")?
    .with_health_log(&cfg.paths.api_health_log)
    .with_retry_policy(retry_policy);

    if let Err(e) = session
        .login(retry_policy.retries, retry_policy.backoff_secs)
        .await
    {
        error!(error = %e, "Initial broker login failed — live markets gated until re-login");
    }
    let health = session.record_probe();
    info!(health = %health, "Broker session");

    // -- Pre-flight ------------------------------------------------------

    let audit = CsvAuditLog::from_paths(&cfg.paths);
    let report = preflight::run(&cfg, session.is_authenticated(), audit.verify_writable());
    report.log();
    if report.verdict() == Verdict::NoGo {
        warn!("Pre-flight NO-GO — continuing; demo markets still evaluate, live markets gated");
    }

    let mut runner = Runner::new(session, audit);

    // -- Candidate loop --------------------------------------------------

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats = RunStats::default();

    info!("Reading candidates from stdin (one JSON object per line). Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Candidate stream closed.");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read candidate stream");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                stats.received += 1;

                let candidate: Candidate = match serde_json::from_str(&line) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "Unparseable candidate line skipped");
                        stats.invalid += 1;
                        continue;
                    }
                };

                runner.refresh_session(cfg.broker.token_max_age_secs).await;

                match runner.process(&candidate, &cfg.snapshot()).await {
                    Ok(decision) if decision.is_bet() => stats.bets += 1,
                    Ok(_) => stats.skipped += 1,
                    Err(_) => stats.invalid += 1,
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    runner.session().record_probe();
    info!(
        received = stats.received,
        bets = stats.bets,
        skipped = stats.skipped,
        invalid = stats.invalid,
        "VALBOT shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("valbot=info"));

    let json_logging = std::env::var("VALBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
