//! Client for the analysis backend (positions, admin views).
//!
//! The backend owns the scraping and sentiment pipeline; the gateway only
//! forwards requests and relays JSON bodies verbatim.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::error::UpstreamError;

const SERVICE: &str = "backend";

#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: super::http_client(Duration::from_secs(30))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Forward a request and hand back the backend's JSON body and status.
    ///
    /// The query string is appended to the upstream URL exactly as received;
    /// re-encoding it would double-escape values the client already encoded.
    /// The caller's user id travels in a header so the backend can scope
    /// its queries; the session itself never leaves the gateway.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        raw_query: Option<&str>,
        body: Option<&Value>,
        user_id: &str,
    ) -> Result<(u16, Value), UpstreamError> {
        let url = match raw_query {
            Some(query) if !query.is_empty() => {
                format!("{}{}?{}", self.base_url, path, query)
            }
            _ => format!("{}{}", self.base_url, path),
        };
        let mut request = self
            .client
            .request(method, &url)
            .header("X-User-Id", user_id);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::RequestFailed {
                service: SERVICE,
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        // Non-JSON bodies (empty 204s, proxy error pages) degrade to null.
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    pub async fn get(
        &self,
        path: &str,
        raw_query: Option<&str>,
        user_id: &str,
    ) -> Result<(u16, Value), UpstreamError> {
        self.forward(Method::GET, path, raw_query, None, user_id)
            .await
    }
}
