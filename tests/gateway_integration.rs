//! End-to-end integration tests for the gateway HTTP server.
//!
//! These tests start a real Axum server on a random port with an in-memory
//! store and verify the full request flow:
//! - Health endpoint without auth
//! - Session middleware (cookie and Bearer, fail-closed)
//! - Key save validation and status
//! - Pin/unpin ordering invariants over HTTP
//! - Admin role gate
//! - Explain rate limiting

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use akleao_gateway::db::{
    CredentialStore, Identity, KeyStatus, KeyType, PinStore, PinnedStock, RoleStore, Store,
    UsageLedger, UsageSummary,
};
use akleao_gateway::error::{CredentialError, DatabaseError};
use akleao_gateway::server::{AppState, RateLimiter, start_server};
use akleao_gateway::upstream::{BackendClient, MarketClient, OpenAiClient};

const USER_TOKEN: &str = "session-user";
const ADMIN_TOKEN: &str = "session-admin";

/// In-memory store mirroring the PostgreSQL semantics the handlers rely on:
/// dense pin positions, silent repeat pins, additive usage counters.
#[derive(Default)]
struct MemoryStore {
    keys: Mutex<HashMap<(String, &'static str), String>>,
    pins: Mutex<HashMap<String, Vec<String>>>,
    usage: Mutex<HashMap<String, UsageSummary>>,
}

fn slot(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::Regular => "regular",
        KeyType::Admin => "admin",
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save_key(
        &self,
        user_id: &str,
        plaintext: &str,
        key_type: KeyType,
    ) -> Result<(), CredentialError> {
        if !plaintext.trim().starts_with("sk-") {
            return Err(CredentialError::InvalidKeyFormat);
        }
        self.keys
            .lock()
            .await
            .insert((user_id.to_string(), slot(key_type)), plaintext.to_string());
        Ok(())
    }

    async fn delete_key(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.keys.lock().await.retain(|(uid, _), _| uid != user_id);
        Ok(())
    }

    async fn get_decrypted_key(
        &self,
        user_id: &str,
        key_type: KeyType,
    ) -> Result<Option<SecretString>, CredentialError> {
        Ok(self
            .keys
            .lock()
            .await
            .get(&(user_id.to_string(), slot(key_type)))
            .map(|k| SecretString::from(k.clone())))
    }

    async fn key_status(&self, user_id: &str) -> Result<KeyStatus, DatabaseError> {
        let keys = self.keys.lock().await;
        Ok(KeyStatus {
            has_api_key: keys.contains_key(&(user_id.to_string(), "regular")),
            has_admin_key: keys.contains_key(&(user_id.to_string(), "admin")),
        })
    }
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn record_usage(
        &self,
        user_id: &str,
        tokens: i64,
        cost: Decimal,
    ) -> Result<(), DatabaseError> {
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(user_id.to_string()).or_default();
        entry.total_requests += 1;
        entry.total_tokens += tokens;
        entry.estimated_cost += cost;
        entry.last_used = Some(Utc::now());
        Ok(())
    }

    async fn summary(&self, user_id: &str) -> Result<UsageSummary, DatabaseError> {
        Ok(self
            .usage
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recent_summary(
        &self,
        user_id: &str,
        _window_days: i32,
    ) -> Result<UsageSummary, DatabaseError> {
        self.summary(user_id).await
    }
}

#[async_trait]
impl PinStore for MemoryStore {
    async fn list_pins(&self, user_id: &str) -> Result<Vec<PinnedStock>, DatabaseError> {
        Ok(self
            .pins
            .lock()
            .await
            .get(user_id)
            .map(|symbols| {
                symbols
                    .iter()
                    .enumerate()
                    .map(|(i, s)| PinnedStock {
                        symbol: s.clone(),
                        position: i as i32,
                        pinned_at: Utc::now(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn pin(&self, user_id: &str, symbol: &str) -> Result<String, DatabaseError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let mut pins = self.pins.lock().await;
        let list = pins.entry(user_id.to_string()).or_default();
        if !list.contains(&symbol) {
            list.push(symbol.clone());
        }
        Ok(symbol)
    }

    async fn unpin(&self, user_id: &str, symbol: &str) -> Result<(), DatabaseError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let mut pins = self.pins.lock().await;
        if let Some(list) = pins.get_mut(user_id) {
            list.retain(|s| s != &symbol);
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, DatabaseError> {
        Ok(match token {
            USER_TOKEN => Some(Identity {
                user_id: "user-1".to_string(),
                role: None,
            }),
            ADMIN_TOKEN => Some(Identity {
                user_id: "admin-1".to_string(),
                role: Some("admin".to_string()),
            }),
            _ => None,
        })
    }

    async fn user_role(&self, user_id: &str) -> Result<Option<String>, DatabaseError> {
        Ok((user_id == "admin-1").then(|| "admin".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("Failed to bind")
}

async fn start_test_server(explain_limit: u64) -> Option<SocketAddr> {
    // Nothing listens on this port; upstream-dependent routes answer 502.
    start_test_server_with_backend(explain_limit, "http://127.0.0.1:9").await
}

async fn start_test_server_with_backend(
    explain_limit: u64,
    backend_url: &str,
) -> Option<SocketAddr> {
    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::default()),
        backend: BackendClient::new(backend_url).unwrap(),
        market: MarketClient::new("http://127.0.0.1:9", None).unwrap(),
        openai: OpenAiClient::new("http://127.0.0.1:9").unwrap(),
        explain_model: "gpt-4o-mini".to_string(),
        explain_rate_limiter: RateLimiter::new(explain_limit, 60),
        shutdown_tx: tokio::sync::RwLock::new(None),
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let origins = vec!["http://localhost:3000".to_string()];
    match start_server(addr, state, &origins).await {
        Ok(bound) => Some(bound),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

/// Stand-in analysis backend that echoes the request line it received.
async fn start_echo_backend() -> Option<SocketAddr> {
    let app = axum::Router::new().fallback(|uri: axum::http::Uri| async move {
        axum::Json(json!({ "uri": uri.to_string() }))
    });
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return None,
        Err(e) => panic!("Failed to bind echo backend: {e:?}"),
    };
    let addr = listener.local_addr().expect("echo backend addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Some(addr)
}

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn cookie(token: &str) -> String {
    format!("better-auth.session_token={token}")
}

#[tokio::test]
async fn health_is_public() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .get(format!("http://{addr}/api/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_a_session() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };
    let client = client();

    for path in [
        "/api/openai/keys/status",
        "/api/openai/usage",
        "/api/pinned-stocks",
        "/api/admin/summary",
    ] {
        let resp = client
            .get(format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401, "no-session GET {path}");
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string(), "error body for {path}");
    }

    let resp = client
        .get(format!("http://{addr}/api/openai/keys/status"))
        .header("Cookie", cookie("bogus-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .get(format!("http://{addr}/api/openai/keys/status"))
        .header("Authorization", format!("Bearer {USER_TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn key_save_validates_and_updates_status() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };
    let client = client();
    let base = format!("http://{addr}");

    // Wrong prefix is rejected before any write
    let resp = client
        .post(format!("{base}/api/openai/key"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "api_key": "not-a-key" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{base}/api/openai/keys/status"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["has_api_key"], false);

    // Valid key lands in the regular slot only
    let resp = client
        .post(format!("{base}/api/openai/key"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "api_key": "sk-test-123", "key_type": "user" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/openai/keys/status"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["has_api_key"], true);
    assert_eq!(status["has_admin_key"], false);

    // Delete clears both slots
    let resp = client
        .delete(format!("{base}/api/openai/key"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/openai/keys/status"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    let status: Value = resp.json().await.unwrap();
    assert_eq!(status["has_api_key"], false);
}

#[tokio::test]
async fn usage_starts_at_zero() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .get(format!("http://{addr}/api/openai/usage"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let usage: Value = resp.json().await.unwrap();
    assert_eq!(usage["total_requests"], 0);
    assert_eq!(usage["total_tokens"], 0);
    assert_eq!(usage["estimated_cost"], 0.0);
    assert_eq!(usage["last_used"], Value::Null);
    assert_eq!(usage["needs_admin_key"], true);
}

#[tokio::test]
async fn pins_stay_dense_over_http() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };
    let client = client();
    let base = format!("http://{addr}");

    for symbol in ["aapl", "MSFT", "nvda"] {
        let resp = client
            .post(format!("{base}/api/pinned-stocks"))
            .header("Cookie", cookie(USER_TOKEN))
            .json(&json!({ "symbol": symbol }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    // Repeat pin is a no-op
    let resp = client
        .post(format!("{base}/api/pinned-stocks"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "symbol": "AAPL" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Unpin from the middle, remaining positions must be 0..N-1
    let resp = client
        .delete(format!("{base}/api/pinned-stocks?symbol=MSFT"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/pinned-stocks"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let pins = body["pinnedStocks"].as_array().unwrap();
    let symbols: Vec<&str> = pins.iter().map(|p| p["symbol"].as_str().unwrap()).collect();
    let positions: Vec<i64> = pins.iter().map(|p| p["position"].as_i64().unwrap()).collect();
    assert_eq!(symbols, vec!["AAPL", "NVDA"]);
    assert_eq!(positions, vec![0, 1]);
}

#[tokio::test]
async fn pin_rejects_bad_symbols() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .post(format!("http://{addr}/api/pinned-stocks"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "symbol": "AAPL'); DROP TABLE pinned_stocks;--" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn admin_routes_check_the_stored_role() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };
    let client = client();
    let base = format!("http://{addr}");

    // Authenticated but not admin
    let resp = client
        .get(format!("{base}/api/admin/summary"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Admin passes the gate; the dead backend turns into a 502, which
    // proves the request made it past the role check.
    let resp = client
        .get(format!("{base}/api/admin/summary"))
        .header("Cookie", cookie(ADMIN_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}

#[tokio::test]
async fn forwarded_queries_keep_their_encoding() {
    let Some(backend_addr) = start_echo_backend().await else {
        return;
    };
    let Some(addr) =
        start_test_server_with_backend(60, &format!("http://{backend_addr}")).await
    else {
        return;
    };
    let client = client();

    // Percent-encoded values and bare flags must reach the backend exactly
    // as the browser sent them, not re-encoded or dropped.
    let resp = client
        .get(format!(
            "http://{addr}/api/positions?filter=a%20b&tags=x%26y&flag"
        ))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["uri"], "/api/positions?filter=a%20b&tags=x%26y&flag");

    // Admin forwards go through the same path once the role check passes
    let resp = client
        .get(format!(
            "http://{addr}/api/admin/summary?since=2025-01-01T00%3A00%3A00Z"
        ))
        .header("Cookie", cookie(ADMIN_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["uri"], "/api/admin/summary?since=2025-01-01T00%3A00%3A00Z");

    // No query string at all stays that way
    let resp = client
        .get(format!("http://{addr}/api/positions"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["uri"], "/api/positions");
}

#[tokio::test]
async fn explain_requires_a_stored_key() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .post(format!("http://{addr}/api/explain"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "metric": "P/E ratio", "value": "34.2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("No API key"));
}

#[tokio::test]
async fn explain_is_rate_limited() {
    let Some(addr) = start_test_server(2).await else {
        return;
    };
    let client = client();
    let base = format!("http://{addr}");
    let payload = json!({ "metric": "EPS", "value": "1.23" });

    // The first two attempts consume the window (and fail on the missing
    // key); the third is refused before any work happens.
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/api/explain"))
            .header("Cookie", cookie(USER_TOKEN))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    let resp = client
        .post(format!("{base}/api/explain"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
}

#[tokio::test]
async fn explain_validates_input_before_rate_limiting() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };

    let resp = client()
        .post(format!("http://{addr}/api/explain"))
        .header("Cookie", cookie(USER_TOKEN))
        .json(&json!({ "metric": "", "value": "1.0" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn market_routes_reject_bad_params() {
    let Some(addr) = start_test_server(60).await else {
        return;
    };
    let client = client();
    let base = format!("http://{addr}");

    let resp = client
        .get(format!("{base}/api/stock/chart?symbol=AAPL&interval=99min"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{base}/api/stock/search?query="))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Dead upstream surfaces as a gateway error, not a 500
    let resp = client
        .get(format!("{base}/api/stock/quote?symbol=AAPL"))
        .header("Cookie", cookie(USER_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}
