//! In-process fake AsianOdds broker for integration testing.
//!
//! Serves `GET /Login` on an ephemeral localhost port and answers from a
//! script of canned replies, recording every query it receives.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// One canned answer to a login request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `Code: 0` with a fresh key/token.
    Grant { url: Option<String> },
    /// Non-zero `Code` with a text message.
    Reject { code: i64, message: String },
    /// Non-2xx HTTP status.
    Status(u16),
    /// 200 with a body that is not a login envelope.
    Garbage,
}

#[derive(Default)]
struct BrokerState {
    script: VecDeque<Reply>,
    /// Used once the script runs out.
    fallback: Option<Reply>,
    queries: Vec<HashMap<String, String>>,
    issued: u32,
}

#[derive(Clone)]
pub struct FakeBroker {
    pub base_url: String,
    state: Arc<Mutex<BrokerState>>,
}

impl FakeBroker {
    /// Start the broker with `script` answered in order, then `fallback`.
    pub async fn start(script: Vec<Reply>, fallback: Reply) -> Self {
        let state = Arc::new(Mutex::new(BrokerState {
            script: script.into(),
            fallback: Some(fallback),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/Login", get(login))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/AsianOddsService"),
            state,
        }
    }

    pub fn queries(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn login_count(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }
}

async fn login(
    State(state): State<Arc<Mutex<BrokerState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let reply = {
        let mut s = state.lock().unwrap();
        s.queries.push(params);
        let next = s.script.pop_front().or_else(|| s.fallback.clone());
        if matches!(next, Some(Reply::Grant { .. })) {
            s.issued += 1;
        }
        (next, s.issued)
    };

    match reply {
        (Some(Reply::Grant { url }), n) => Json(json!({
            "Code": 0,
            "Result": {
                "Key": format!("key-{n}"),
                "Token": format!("token-{n}"),
                "Url": url,
            }
        }))
        .into_response(),
        (Some(Reply::Reject { code, message }), _) => Json(json!({
            "Code": code,
            "Result": { "TextMessage": message }
        }))
        .into_response(),
        (Some(Reply::Status(code)), _) => (
            StatusCode::from_u16(code).unwrap(),
            "broker unavailable".to_string(),
        )
            .into_response(),
        (Some(Reply::Garbage), _) | (None, _) => "<html>maintenance</html>".into_response(),
    }
}

/// Broker that sends a successful login's headers at once but holds the
/// body back for `delay`. Returns the base URL.
pub async fn slow_body_broker(delay: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;

                let body = r#"{"Code":0,"Result":{"Key":"slow-key","Token":"slow-token"}}"#;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.flush().await;
                tokio::time::sleep(delay).await;
                let _ = stream.write_all(body.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}/AsianOddsService")
}

/// Unique scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("valbot_{tag}_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
