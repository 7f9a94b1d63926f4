//! Client for the third-party market-data provider.
//!
//! Responses arrive in the provider's shape (arrays of loosely-typed
//! objects); this module reshapes them into the small DTOs the dashboard
//! actually renders.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

const SERVICE: &str = "market-data";

#[derive(Clone)]
pub struct MarketClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// Real-time quote for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: f64,
    pub change: f64,
    #[serde(rename = "changesPercentage")]
    pub changes_percentage: f64,
    #[serde(rename = "dayLow")]
    pub day_low: Option<f64>,
    #[serde(rename = "dayHigh")]
    pub day_high: Option<f64>,
    #[serde(rename = "yearLow")]
    pub year_low: Option<f64>,
    #[serde(rename = "yearHigh")]
    pub year_high: Option<f64>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    pub volume: Option<f64>,
    #[serde(rename = "previousClose")]
    pub previous_close: Option<f64>,
}

/// Company fundamentals shown on the overview tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub symbol: String,
    #[serde(rename = "companyName")]
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub ceo: Option<String>,
    #[serde(rename = "fullTimeEmployees")]
    pub full_time_employees: Option<String>,
    #[serde(rename = "mktCap")]
    pub market_cap: Option<f64>,
    pub beta: Option<f64>,
    pub image: Option<String>,
}

/// One bar of price history, oldest-last as the provider returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartBar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub symbol: String,
    pub name: Option<String>,
    #[serde(rename = "stockExchange")]
    pub exchange: Option<String>,
    pub currency: Option<String>,
}

impl MarketClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: super::http_client(Duration::from_secs(15))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::RequestFailed {
                service: SERVICE,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus {
                service: SERVICE,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: e.to_string(),
            })
    }

    /// Provider returns a one-element array for single-symbol quotes.
    pub async fn quote(&self, symbol: &str) -> Result<Quote, UpstreamError> {
        let symbol = symbol.to_ascii_uppercase();
        let quotes: Vec<Quote> = self
            .get_json(&format!("/api/v3/quote/{symbol}"), &[])
            .await?;
        quotes
            .into_iter()
            .next()
            .ok_or(UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: format!("no quote for {symbol}"),
            })
    }

    pub async fn profile(&self, symbol: &str) -> Result<CompanyProfile, UpstreamError> {
        let symbol = symbol.to_ascii_uppercase();
        let profiles: Vec<CompanyProfile> = self
            .get_json(&format!("/api/v3/profile/{symbol}"), &[])
            .await?;
        profiles
            .into_iter()
            .next()
            .ok_or(UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: format!("no profile for {symbol}"),
            })
    }

    /// Intraday bars at the given interval ("5min", "1hour", ...)
    pub async fn chart(&self, symbol: &str, interval: &str) -> Result<Vec<ChartBar>, UpstreamError> {
        let symbol = symbol.to_ascii_uppercase();
        self.get_json(&format!("/api/v3/historical-chart/{interval}/{symbol}"), &[])
            .await
    }

    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, UpstreamError> {
        let limit = limit.to_string();
        self.get_json("/api/v3/search", &[("query", query), ("limit", limit.as_str())])
            .await
    }
}
