//! Market-data proxy handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};

use crate::server::types::{ChartQuery, SearchQuery, SymbolQuery};
use crate::server::{ApiError, AppState};
use crate::upstream::market::{ChartBar, CompanyProfile, Quote, SearchHit};

const ALLOWED_INTERVALS: &[&str] = &["1min", "5min", "15min", "30min", "1hour", "4hour"];

pub async fn quote_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<Quote>, ApiError> {
    let quote = state.market.quote(query.symbol.trim()).await?;
    Ok(Json(quote))
}

pub async fn overview_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<CompanyProfile>, ApiError> {
    let profile = state.market.profile(query.symbol.trim()).await?;
    Ok(Json(profile))
}

pub async fn chart_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Vec<ChartBar>>, ApiError> {
    // The interval lands in the upstream URL path, so only known values pass.
    if !ALLOWED_INTERVALS.contains(&query.interval.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "interval must be one of: {}",
            ALLOWED_INTERVALS.join(", ")
        )));
    }
    let bars = state
        .market
        .chart(query.symbol.trim(), &query.interval)
        .await?;
    Ok(Json(bars))
}

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let term = query.query.trim();
    if term.is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let limit = query.limit.clamp(1, 50);
    let hits = state.market.search(term, limit).await?;
    Ok(Json(hits))
}
