//! Pinned-stock handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::db::Identity;
use crate::server::types::{
    PinResponse, PinStockRequest, PinnedStocksResponse, UnpinQuery,
};
use crate::server::{ApiError, AppState};

fn validate_symbol(symbol: &str) -> Result<&str, ApiError> {
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.len() > 10 {
        return Err(ApiError::BadRequest(
            "symbol must be 1-10 characters".to_string(),
        ));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ApiError::BadRequest(
            "symbol contains invalid characters".to_string(),
        ));
    }
    Ok(symbol)
}

pub async fn list_pins_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<PinnedStocksResponse>, ApiError> {
    let pins = state.store.list_pins(&identity.user_id).await?;
    Ok(Json(PinnedStocksResponse {
        pinned_stocks: pins.into_iter().map(Into::into).collect(),
    }))
}

pub async fn pin_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<PinStockRequest>,
) -> Result<Json<PinResponse>, ApiError> {
    let symbol = validate_symbol(&request.symbol)?;
    let symbol = state.store.pin(&identity.user_id, symbol).await?;
    Ok(Json(PinResponse {
        success: true,
        symbol,
    }))
}

pub async fn unpin_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UnpinQuery>,
) -> Result<Json<PinResponse>, ApiError> {
    let symbol = validate_symbol(&query.symbol)?;
    state.store.unpin(&identity.user_id, symbol).await?;
    Ok(Json(PinResponse {
        success: true,
        symbol: symbol.to_ascii_uppercase(),
    }))
}
