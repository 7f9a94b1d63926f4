//! Metric explanation handler: user's own key, LLM call, usage ledger write.

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use crate::db::{Identity, KeyType};
use crate::server::types::{ExplainRequest, ExplainResponse};
use crate::server::{ApiError, AppState};
use crate::upstream::openai::estimate_cost;

pub async fn explain_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ExplainRequest>,
) -> Result<Json<ExplainResponse>, ApiError> {
    if request.metric.trim().is_empty() || request.value.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "metric and value must not be empty".to_string(),
        ));
    }

    if !state.explain_rate_limiter.check() {
        return Err(ApiError::TooManyRequests(
            "Too many explanation requests, try again shortly".to_string(),
        ));
    }

    let api_key = state
        .store
        .get_decrypted_key(&identity.user_id, KeyType::Regular)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest("No API key configured. Add one in settings.".to_string())
        })?;

    let explanation = state
        .openai
        .explain(
            &api_key,
            &state.explain_model,
            request.metric.trim(),
            request.value.trim(),
            request.symbol.as_deref().map(str::trim),
        )
        .await?;

    // Ledger writes never fail the request; the user already has their answer.
    let cost = estimate_cost(&state.explain_model, explanation.usage);
    if let Err(err) = state
        .store
        .record_usage(&identity.user_id, explanation.usage.total_tokens, cost)
        .await
    {
        tracing::warn!(user_id = %identity.user_id, error = %err, "failed to record usage");
    }

    Ok(Json(ExplainResponse {
        explanation: explanation.text,
        model: state.explain_model.clone(),
        tokens_used: explanation.usage.total_tokens,
    }))
}
