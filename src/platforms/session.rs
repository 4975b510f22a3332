//! Authenticated broker session.
//!
//! Owns the key/token pair issued by the broker, logs in with exponential
//! backoff, re-authenticates lazily when the token goes stale, and reports a
//! health snapshot. Every login attempt appends one line to the API health
//! log. Nothing here is persisted: a new process always starts
//! unauthenticated.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::asianodds::{AsianOddsClient, LoginGrant};
use super::{LoginTransport, SessionError, Sleeper, TokioSleeper};

/// Ceiling for the delay between login attempts.
pub const MAX_BACKOFF_SECS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Doubling delay sequence capped at `MAX_BACKOFF_SECS`. No jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: f64,
}

impl Backoff {
    pub fn new(initial_secs: f64) -> Self {
        let initial = if initial_secs.is_finite() {
            initial_secs.max(0.0)
        } else {
            0.0
        };
        Self {
            current: initial.min(MAX_BACKOFF_SECS),
        }
    }

    /// The delay to wait now; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs_f64(self.current);
        self.current = (self.current * 2.0).min(MAX_BACKOFF_SECS);
        delay
    }
}

/// Retry budget used by `ensure_alive`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_secs: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials & health
// ---------------------------------------------------------------------------

/// Key/token pair for authenticated calls. Both or neither: a session holds
/// an `Option<Credentials>`, never a half-filled pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub token: String,
}

impl Credentials {
    /// Query parameters expected by authenticated endpoints.
    pub fn as_query(&self) -> [(&'static str, &str); 2] {
        [("key", self.key.as_str()), ("token", self.token.as_str())]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Point-in-time view of the session, safe to hand to the host loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub authenticated: bool,
    /// Seconds since the last successful login; `None` if never logged in.
    pub token_age_s: Option<i64>,
    pub session_url: Option<String>,
    pub username: String,
}

impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Authenticated: {} | Token age: {}s | Session URL: {}",
            self.authenticated,
            self.token_age_s.unwrap_or(0),
            self.session_url.as_deref().unwrap_or("-"),
        )
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    base_url: String,
    username: String,
    password: SecretString,
    password_is_md5: bool,
    credentials: Option<Credentials>,
    session_url: Option<String>,
    last_login: Option<DateTime<Utc>>,
    health_log: Option<PathBuf>,
    retry_policy: RetryPolicy,
    transport: Box<dyn LoginTransport>,
    sleeper: Box<dyn Sleeper>,
}

impl SessionManager {
    /// Create an unauthenticated session using the HTTP transport.
    pub fn new(
        base_url: &str,
        username: &str,
        password: SecretString,
        password_is_md5: bool,
    ) -> Result<Self> {
        Ok(Self::with_transport(
            base_url,
            username,
            password,
            password_is_md5,
            Box::new(AsianOddsClient::new()?),
        ))
    }

    /// Create an unauthenticated session over an explicit transport.
    pub fn with_transport(
        base_url: &str,
        username: &str,
        password: SecretString,
        password_is_md5: bool,
        transport: Box<dyn LoginTransport>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password,
            password_is_md5,
            credentials: None,
            session_url: None,
            last_login: None,
            health_log: None,
            retry_policy: RetryPolicy::default(),
            transport,
            sleeper: Box::new(TokioSleeper),
        }
    }

    /// Append one line per login attempt to this file.
    pub fn with_health_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.health_log = Some(path.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password_is_md5(&self) -> bool {
        self.password_is_md5
    }

    // -- Authentication ----------------------------------------------------

    /// Log in, retrying with exponential backoff.
    ///
    /// `retries` is the total attempt budget (clamped to at least 1). The
    /// delay starts at `backoff_secs` and doubles up to 30 s; there is no
    /// sleep after the final attempt. On exhaustion the session is left
    /// unauthenticated and the last attempt's error text is returned.
    pub async fn login(&mut self, retries: u32, backoff_secs: f64) -> Result<(), SessionError> {
        let attempts = retries.max(1);
        let mut backoff = Backoff::new(backoff_secs);
        let mut last_error: Option<String> = None;

        for attempt in 1..=attempts {
            let outcome = self
                .transport
                .login(&self.base_url, &self.username, self.password.expose_secret())
                .await
                .and_then(|reply| {
                    reply
                        .response
                        .into_grant(&self.base_url)
                        .map(|grant| (grant, reply.latency_ms))
                });

            match outcome {
                Ok((grant, latency_ms)) => {
                    self.accept(grant);
                    self.append_health(&format!("LOGIN OK | latency_ms={latency_ms}"));
                    info!(
                        username = %self.username,
                        attempt,
                        latency_ms,
                        session_url = self.session_url.as_deref().unwrap_or_default(),
                        "Broker authentication successful"
                    );
                    return Ok(());
                }
                Err(e) => {
                    let text = e.to_string();
                    warn!(attempt, attempts, error = %text, "Broker login attempt failed");
                    self.append_health(&text);
                    last_error = Some(text);
                }
            }

            if attempt < attempts {
                let delay = backoff.next_delay();
                debug!(delay_secs = delay.as_secs_f64(), "Backing off before next login attempt");
                self.sleeper.sleep(delay).await;
            }
        }

        self.credentials = None;
        self.session_url = None;
        self.last_login = None;

        Err(SessionError::Authentication {
            attempts,
            last_error: last_error.unwrap_or_else(|| "LOGIN FAILED".to_string()),
        })
    }

    fn accept(&mut self, grant: LoginGrant) {
        self.credentials = Some(Credentials {
            key: grant.key,
            token: grant.token,
        });
        self.session_url = Some(grant.url);
        self.last_login = Some(Utc::now());
    }

    /// True iff the broker has issued both a key and a token.
    pub fn is_authenticated(&self) -> bool {
        self.credentials
            .as_ref()
            .is_some_and(|c| !c.key.is_empty() && !c.token.is_empty())
    }

    /// Credentials for an authenticated call.
    pub fn auth_params(&self) -> Result<&Credentials, SessionError> {
        match self.credentials {
            Some(ref c) if self.is_authenticated() => Ok(c),
            _ => Err(SessionError::NotAuthenticated),
        }
    }

    /// Seconds since the last successful login, measured at `now`.
    pub fn token_age_at(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_login.map(|ts| (now - ts).num_seconds().max(0))
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health_snapshot_at(Utc::now())
    }

    pub fn health_snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
        HealthSnapshot {
            authenticated: self.is_authenticated(),
            token_age_s: self.token_age_at(now),
            session_url: self.session_url.clone(),
            username: self.username.clone(),
        }
    }

    /// Make sure the session is usable before an evaluation cycle.
    ///
    /// Logs in if unauthenticated; forces a fresh login once the token age
    /// reaches `max_age_secs` (`None` or 0 disables the age check).
    /// Returns whether a login was performed.
    pub async fn ensure_alive(&mut self, max_age_secs: Option<u64>) -> Result<bool, SessionError> {
        let policy = self.retry_policy;

        if !self.is_authenticated() {
            info!("Session not authenticated, logging in");
            self.login(policy.retries, policy.backoff_secs).await?;
            return Ok(true);
        }

        if let Some(max_age) = max_age_secs.filter(|m| *m > 0) {
            let age = self.token_age_at(Utc::now()).unwrap_or(0);
            if age >= max_age as i64 {
                info!(token_age_s = age, max_age_s = max_age, "Session token stale, re-authenticating");
                self.login(policy.retries, policy.backoff_secs).await?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Append the current health snapshot to the health log.
    pub fn record_probe(&self) -> HealthSnapshot {
        let snapshot = self.health_snapshot();
        self.append_health(&snapshot.to_string());
        snapshot
    }

    // -- Health log --------------------------------------------------------

    fn append_health(&self, message: &str) {
        let Some(ref path) = self.health_log else {
            return;
        };
        if let Err(e) = append_line(path, message) {
            warn!(path = %path.display(), error = %e, "Failed to write API health log");
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_login(&mut self, secs: i64) {
        if let Some(ts) = self.last_login {
            self.last_login = Some(ts - chrono::Duration::seconds(secs));
        }
    }
}

fn append_line(path: &Path, message: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
    writeln!(file, "{ts} | {message}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
