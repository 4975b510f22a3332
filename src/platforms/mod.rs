//! Broker integration.
//!
//! Defines the `LoginTransport` seam used by the session manager and
//! provides the AsianOdds implementation:
//! - `asianodds`: wire types and the `reqwest` login transport
//! - `session`: authenticated-session lifecycle (login, staleness, health)

pub mod asianodds;
pub mod session;

use async_trait::async_trait;
use std::time::Duration;

use asianodds::LoginResponse;

/// Body of a login round-trip that reached the broker.
#[derive(Debug, Clone)]
pub struct LoginReply {
    pub response: LoginResponse,
    /// Request to fully-read body.
    pub latency_ms: u64,
}

/// Why a single login attempt failed. Retried by the session manager and
/// never surfaced past `SessionManager::login`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    #[error("LOGIN REQ ERROR: {0}")]
    Transport(String),

    #[error("LOGIN HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("LOGIN FAIL code={code} msg={message}")]
    Rejected { code: i64, message: String },

    #[error("LOGIN MALFORMED: {0}")]
    Malformed(String),
}

/// Outcome of a login chain or an authenticated-call precondition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Retry budget exhausted without a successful login.
    #[error("Authentication failed after {attempts} attempt(s): {last_error}")]
    Authentication { attempts: u32, last_error: String },

    #[error("Not authenticated")]
    NotAuthenticated,
}

/// One HTTP round-trip to the broker's login endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoginTransport: Send + Sync {
    async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginReply, AttemptError>;
}

/// Waits between login attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
