//! Request and response bodies for the gateway API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{KeyType, PinnedStock};

// --- Health ---

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// --- API keys ---

#[derive(Deserialize)]
pub struct SaveKeyRequest {
    pub api_key: String,
    #[serde(default)]
    pub key_type: KeyTypeParam,
}

/// Wire name for the key slot. "user" is the default the dashboard sends.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyTypeParam {
    #[default]
    User,
    Admin,
}

impl From<KeyTypeParam> for KeyType {
    fn from(value: KeyTypeParam) -> Self {
        match value {
            KeyTypeParam::User => KeyType::Regular,
            KeyTypeParam::Admin => KeyType::Admin,
        }
    }
}

#[derive(Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct KeyStatusResponse {
    pub has_api_key: bool,
    pub has_admin_key: bool,
}

#[derive(Serialize)]
pub struct UsageResponse {
    pub has_api_key: bool,
    pub has_admin_key: bool,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub requests_30d: i64,
    pub tokens_30d: i64,
    pub cost_30d: f64,
    pub openai_actual_spend: Option<f64>,
    pub needs_admin_key: bool,
}

// --- Pinned stocks ---

#[derive(Serialize)]
pub struct PinnedStockEntry {
    pub symbol: String,
    pub position: i32,
    pub pinned_at: DateTime<Utc>,
}

impl From<PinnedStock> for PinnedStockEntry {
    fn from(pin: PinnedStock) -> Self {
        Self {
            symbol: pin.symbol,
            position: pin.position,
            pinned_at: pin.pinned_at,
        }
    }
}

#[derive(Serialize)]
pub struct PinnedStocksResponse {
    #[serde(rename = "pinnedStocks")]
    pub pinned_stocks: Vec<PinnedStockEntry>,
}

#[derive(Deserialize)]
pub struct PinStockRequest {
    pub symbol: String,
}

#[derive(Deserialize)]
pub struct UnpinQuery {
    pub symbol: String,
}

#[derive(Serialize)]
pub struct PinResponse {
    pub success: bool,
    pub symbol: String,
}

// --- Market data ---

#[derive(Deserialize)]
pub struct SymbolQuery {
    pub symbol: String,
}

#[derive(Deserialize)]
pub struct ChartQuery {
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "5min".to_string()
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

fn default_search_limit() -> u32 {
    10
}

// --- Explain ---

#[derive(Deserialize)]
pub struct ExplainRequest {
    pub metric: String,
    pub value: String,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Serialize)]
pub struct ExplainResponse {
    pub explanation: String,
    pub model: String,
    pub tokens_used: i64,
}
