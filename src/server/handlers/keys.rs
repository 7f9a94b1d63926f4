//! API key management and usage reporting handlers.

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use rust_decimal::prelude::ToPrimitive;

use crate::db::{Identity, KeyType};
use crate::server::types::{AckResponse, KeyStatusResponse, SaveKeyRequest, UsageResponse};
use crate::server::{ApiError, AppState};

pub async fn save_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<SaveKeyRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    if request.api_key.trim().is_empty() {
        return Err(ApiError::BadRequest("api_key must not be empty".to_string()));
    }

    state
        .store
        .save_key(
            &identity.user_id,
            &request.api_key,
            request.key_type.into(),
        )
        .await?;

    tracing::info!(user_id = %identity.user_id, "API key saved");
    Ok(Json(AckResponse::ok("API key saved successfully")))
}

pub async fn delete_key_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<AckResponse>, ApiError> {
    state.store.delete_key(&identity.user_id).await?;

    tracing::info!(user_id = %identity.user_id, "API keys removed");
    Ok(Json(AckResponse::ok("API key removed successfully")))
}

pub async fn key_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<KeyStatusResponse>, ApiError> {
    let status = state.store.key_status(&identity.user_id).await?;
    Ok(Json(KeyStatusResponse {
        has_api_key: status.has_api_key,
        has_admin_key: status.has_admin_key,
    }))
}

/// Usage window shown alongside the all-time totals.
const RECENT_WINDOW_DAYS: i32 = 30;

pub async fn usage_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<UsageResponse>, ApiError> {
    let status = state.store.key_status(&identity.user_id).await?;
    let totals = state.store.summary(&identity.user_id).await?;
    let recent = state
        .store
        .recent_summary(&identity.user_id, RECENT_WINDOW_DAYS)
        .await?;

    // Real billing numbers need an admin-scoped key; without one the local
    // estimates stand alone and the UI prompts for the key.
    let openai_actual_spend = match state
        .store
        .get_decrypted_key(&identity.user_id, KeyType::Admin)
        .await
    {
        Ok(Some(admin_key)) => state.openai.monthly_spend(&admin_key).await,
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(user_id = %identity.user_id, error = %err, "admin key unavailable");
            None
        }
    };

    Ok(Json(UsageResponse {
        has_api_key: status.has_api_key,
        has_admin_key: status.has_admin_key,
        total_requests: totals.total_requests,
        total_tokens: totals.total_tokens,
        estimated_cost: totals.estimated_cost.to_f64().unwrap_or(0.0),
        last_used: totals.last_used,
        requests_30d: recent.total_requests,
        tokens_30d: recent.total_tokens,
        cost_30d: recent.estimated_cost.to_f64().unwrap_or(0.0),
        openai_actual_spend,
        needs_admin_key: !status.has_admin_key,
    }))
}
