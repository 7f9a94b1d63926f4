//! Portfolio-position forwarding.
//!
//! The analysis backend owns position storage; the gateway forwards the
//! request verbatim under the caller's user id and relays the JSON reply
//! with the upstream's status code.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{RawQuery, Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::db::Identity;
use crate::server::{ApiError, AppState};

pub async fn positions_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    RawQuery(raw_query): RawQuery,
    request: Request,
) -> Result<Response, ApiError> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let body = if matches!(method, Method::POST | Method::PATCH) {
        let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
            .await
            .map_err(|e| ApiError::BadRequest(format!("unreadable body: {e}")))?;
        if bytes.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice::<Value>(&bytes)
                    .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?,
            )
        }
    } else {
        None
    };

    let (status, reply) = state
        .backend
        .forward(
            method,
            &path,
            raw_query.as_deref(),
            body.as_ref(),
            &identity.user_id,
        )
        .await?;

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(reply)).into_response())
}
