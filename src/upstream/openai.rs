//! Client for the LLM provider's chat-completion and costs endpoints.

use std::time::Duration;

use chrono::Datelike;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::error::UpstreamError;

const SERVICE: &str = "openai";

#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
}

/// Token counts reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// Completion text plus the usage needed for the ledger.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct CostsResponse {
    #[serde(default)]
    data: Vec<CostBucket>,
}

#[derive(Deserialize)]
struct CostBucket {
    #[serde(default)]
    results: Vec<CostResult>,
}

#[derive(Deserialize)]
struct CostResult {
    amount: CostAmount,
}

#[derive(Deserialize)]
struct CostAmount {
    value: f64,
}

impl OpenAiClient {
    pub fn new(base_url: &str) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: super::http_client(Duration::from_secs(60))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the model for a short plain-language explanation of a financial
    /// metric value. The user's own key authenticates the call.
    pub async fn explain(
        &self,
        api_key: &SecretString,
        model: &str,
        metric: &str,
        value: &str,
        symbol: Option<&str>,
    ) -> Result<Explanation, UpstreamError> {
        let context = symbol
            .map(|s| format!(" for {s}"))
            .unwrap_or_default();
        let prompt = format!(
            "Explain in 2-3 sentences what it means that the metric \
             \"{metric}\"{context} has the value \"{value}\". \
             Write for a retail investor, no jargon."
        );

        let body = json!({
            "model": model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a concise financial analyst assistant."
                },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": 300,
            "temperature": 0.3,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&body)
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

        let chat: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| UpstreamError::InvalidResponse {
                    service: SERVICE,
                    reason: e.to_string(),
                })?;

        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: "empty choices".to_string(),
            })?;

        Ok(Explanation {
            text,
            usage: chat.usage.unwrap_or_default(),
        })
    }

    /// Current-month spend from the provider's costs endpoint.
    ///
    /// Requires an admin-scoped key; returns None when the provider
    /// declines the call so the usage view can still render.
    pub async fn monthly_spend(&self, admin_key: &SecretString) -> Option<f64> {
        let start = chrono::Utc::now()
            .date_naive()
            .with_day(1)
            .map(|d| d.and_hms_opt(0, 0, 0))??
            .and_utc()
            .timestamp();

        let response = self
            .client
            .get(format!("{}/v1/organization/costs", self.base_url))
            .bearer_auth(admin_key.expose_secret())
            .query(&[("start_time", start.to_string()), ("limit", "31".to_string())])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "costs endpoint declined");
            return None;
        }

        let costs: CostsResponse = response.json().await.ok()?;
        let total: f64 = costs
            .data
            .iter()
            .flat_map(|bucket| &bucket.results)
            .map(|r| r.amount.value)
            .sum();
        Some(total)
    }
}

/// Cost of a completion in dollars, from the provider's published per-token
/// prices. Unknown models are accounted at zero rather than guessed.
pub fn estimate_cost(model: &str, usage: TokenUsage) -> Decimal {
    let (input_per_million, output_per_million) = match model {
        "gpt-4o-mini" => (dec!(0.15), dec!(0.60)),
        "gpt-4o" => (dec!(2.50), dec!(10.00)),
        _ => return Decimal::ZERO,
    };
    let million = dec!(1000000);
    let input = Decimal::from(usage.prompt_tokens) * input_per_million / million;
    let output = Decimal::from(usage.completion_tokens) * output_per_million / million;
    input + output
}
