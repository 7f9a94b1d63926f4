//! Gateway API handlers.

pub mod admin;
pub mod explain;
pub mod keys;
pub mod pins;
pub mod positions;
pub mod stocks;

use axum::Json;

use crate::server::types::HealthResponse;

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
