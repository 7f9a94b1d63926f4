//! Admin view handlers. Every route re-checks the stored role before
//! touching the backend; session auth alone is not enough here.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::auth::require_admin;
use crate::db::Identity;
use crate::server::{ApiError, AppState};

async fn forward_admin(
    state: &AppState,
    identity: &Identity,
    path: &str,
    raw_query: Option<String>,
) -> Result<Response, ApiError> {
    require_admin(state.store.as_ref(), &identity.user_id).await?;

    let (status, reply) = state
        .backend
        .get(path, raw_query.as_deref(), &identity.user_id)
        .await?;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, Json(reply)).into_response())
}

pub async fn comments_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    forward_admin(&state, &identity, "/api/admin/comments", raw_query).await
}

pub async fn posts_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    forward_admin(&state, &identity, "/api/admin/posts", raw_query).await
}

pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    forward_admin(&state, &identity, "/api/admin/summary", raw_query).await
}
