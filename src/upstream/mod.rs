//! HTTP clients for the gateway's external collaborators.
//!
//! Three services sit behind this module: the analysis backend (positions,
//! Reddit data, admin views), the market-data provider (quotes, fundamentals,
//! charts, symbol search) and the LLM provider used for metric explanations.

pub mod backend;
pub mod market;
pub mod openai;

pub use backend::BackendClient;
pub use market::MarketClient;
pub use openai::OpenAiClient;

use std::time::Duration;

use crate::error::UpstreamError;

/// Shared reqwest client settings for all upstreams.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}
