//! AsianOdds web API integration.
//!
//! Only the login endpoint is exercised here; odds and bet placement calls
//! reuse the key/token pair exposed by `SessionManager::auth_params`.
//!
//! Login: `GET {base_url}/Login?username=..&password=..` with
//! `Accept: application/json`. The password is sent pre-hashed (MD5).
//!
//! Response envelope: `{ "Code": int, "Result": { "Key", "Token", "Url"?,
//! "TextMessage"? } }`. `Code == 0` is the only success code.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{AttemptError, LoginReply, LoginTransport};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "VALBOT/0.1.0";

/// The only `Code` value the broker uses for success.
pub const SUCCESS_CODE: i64 = 0;

// ---------------------------------------------------------------------------
// AsianOdds API types
// ---------------------------------------------------------------------------

/// Login response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponse {
    pub code: i64,
    #[serde(default)]
    pub result: Option<LoginResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResult {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text_message: Option<String>,
}

/// What a successful login grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub key: String,
    pub token: String,
    /// Session-scoped service URL.
    pub url: String,
}

impl LoginResponse {
    /// Interpret the envelope. `fallback_url` is used when the broker does
    /// not hand out a session-scoped URL.
    pub fn into_grant(self, fallback_url: &str) -> Result<LoginGrant, AttemptError> {
        if self.code != SUCCESS_CODE {
            let message = self
                .result
                .and_then(|r| r.text_message)
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(AttemptError::Rejected {
                code: self.code,
                message,
            });
        }

        let result = self
            .result
            .ok_or_else(|| AttemptError::Malformed("success without Result object".into()))?;

        let key = result.key.filter(|k| !k.is_empty());
        let token = result.token.filter(|t| !t.is_empty());
        let (key, token) = match (key, token) {
            (Some(key), Some(token)) => (key, token),
            _ => {
                return Err(AttemptError::Malformed(
                    "success without both Key and Token".into(),
                ))
            }
        };

        let url = result
            .url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| fallback_url.to_string());

        Ok(LoginGrant { key, token, url })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP login transport for the AsianOdds web API.
pub struct AsianOddsClient {
    http: Client,
}

impl AsianOddsClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client for AsianOdds")?;

        Ok(Self { http })
    }
}

#[async_trait]
impl LoginTransport for AsianOddsClient {
    async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginReply, AttemptError> {
        let url = format!("{base_url}/Login");
        debug!(url = %url, username, "AsianOdds login request");

        let started = Instant::now();
        let resp = self
            .http
            .get(&url)
            .query(&[("username", username), ("password", password)])
            .header(ACCEPT, "application/json")
            .send()
            .await
            // The query string carries the password; keep it out of the error text.
            .map_err(|e| AttemptError::Transport(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError::Http { status, body });
        }

        let response: LoginResponse = resp
            .json()
            .await
            .map_err(|e| AttemptError::Malformed(e.without_url().to_string()))?;
        // Full round-trip, body included.
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(LoginReply {
            response,
            latency_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
