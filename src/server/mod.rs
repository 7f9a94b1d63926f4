//! Axum HTTP server for the dashboard gateway.
//!
//! Route layout: a small public router (health), and a protected router
//! carrying every `/api` route behind the session middleware. Admin routes
//! additionally check the stored role inside their handlers.

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::db::Store;
use crate::error::{AuthError, CredentialError, DatabaseError, Error, UpstreamError};
use crate::upstream::{BackendClient, MarketClient, OpenAiClient};

/// Sliding-window rate limiter for the explain endpoint.
///
/// One shared window for the whole process: the cap bounds the gateway's
/// aggregate LLM spend, it does not arbitrate between users. A budget of
/// zero refuses every request, so the endpoint can be switched off through
/// configuration.
pub struct RateLimiter {
    /// Requests per window. Zero means the endpoint is disabled.
    max_requests: u64,
    /// Window length in seconds.
    window_secs: u64,
    /// Requests left in the window that started at `window_start`.
    remaining: AtomicU64,
    /// Epoch second the current window opened.
    window_start: AtomicU64,
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            remaining: AtomicU64::new(max_requests),
            // The epoch start is always expired, so the first request opens
            // the first real window.
            window_start: AtomicU64::new(0),
        }
    }

    /// Try to consume one request. Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self) -> bool {
        self.check_at(epoch_secs())
    }

    /// Same as [`check`](Self::check) with the clock supplied by the caller.
    fn check_at(&self, now: u64) -> bool {
        if self.max_requests == 0 {
            return false;
        }

        let opened = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(opened) >= self.window_secs {
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests - 1, Ordering::Relaxed);
            return true;
        }

        // Claim one slot from the open window.
        let mut left = self.remaining.load(Ordering::Relaxed);
        while left > 0 {
            match self.remaining.compare_exchange_weak(
                left,
                left - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => left = observed,
            }
        }
        false
    }
}

/// Shared state for all gateway handlers.
pub struct AppState {
    /// Storage backend (credentials, usage, pins, sessions).
    pub store: Arc<dyn Store>,
    /// Analysis backend client (positions, admin views).
    pub backend: BackendClient,
    /// Market-data provider client.
    pub market: MarketClient,
    /// LLM provider client.
    pub openai: OpenAiClient,
    /// Model used for metric explanations.
    pub explain_model: String,
    /// Rate limiter for the explain endpoint.
    pub explain_rate_limiter: RateLimiter,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

/// Error type at the HTTP boundary. Every failure renders as a JSON body
/// `{"error": "..."}` with the matching status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    TooManyRequests(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &str) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(%status, message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingSession | AuthError::InvalidSession => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::Forbidden => ApiError::Forbidden(err.to_string()),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::InvalidKeyFormat => ApiError::BadRequest(err.to_string()),
            // Internal detail stays in the logs, not the response body.
            CredentialError::Crypto(_) | CredentialError::Database(_) => {
                tracing::error!(error = %err, "credential operation failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "database operation failed");
        ApiError::Internal("Internal server error".to_string())
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::BadGateway(err.to_string())
    }
}

/// Session middleware for the protected router. Resolves the session and
/// attaches the caller's [`crate::db::Identity`] to the request.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = auth::authenticate(state.store.as_ref(), request.headers()).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    cors_origins: &[String],
) -> Result<SocketAddr, Error> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind to {addr}: {e}")))?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| Error::Server(format!("Failed to get local addr: {e}")))?;

    // Public routes (no auth)
    let public = Router::new().route("/api/health", get(handlers::health_handler));

    // Protected routes (always require a session)
    let protected = Router::new()
        // API keys
        .route(
            "/api/openai/key",
            post(handlers::keys::save_key_handler).delete(handlers::keys::delete_key_handler),
        )
        .route(
            "/api/openai/keys/status",
            get(handlers::keys::key_status_handler),
        )
        .route("/api/openai/usage", get(handlers::keys::usage_handler))
        // Pinned stocks
        .route(
            "/api/pinned-stocks",
            get(handlers::pins::list_pins_handler)
                .post(handlers::pins::pin_handler)
                .delete(handlers::pins::unpin_handler),
        )
        // Market data
        .route("/api/stock/quote", get(handlers::stocks::quote_handler))
        .route(
            "/api/stock/overview",
            get(handlers::stocks::overview_handler),
        )
        .route("/api/stock/chart", get(handlers::stocks::chart_handler))
        .route("/api/stock/search", get(handlers::stocks::search_handler))
        // Explanations
        .route("/api/explain", post(handlers::explain::explain_handler))
        // Positions (forwarded to the analysis backend)
        .route(
            "/api/positions",
            get(handlers::positions::positions_handler)
                .post(handlers::positions::positions_handler)
                .patch(handlers::positions::positions_handler)
                .delete(handlers::positions::positions_handler),
        )
        .route(
            "/api/positions/{*rest}",
            get(handlers::positions::positions_handler)
                .post(handlers::positions::positions_handler)
                .patch(handlers::positions::positions_handler)
                .delete(handlers::positions::positions_handler),
        )
        // Admin views (role-checked in the handlers)
        .route(
            "/api/admin/comments",
            get(handlers::admin::comments_handler),
        )
        .route("/api/admin/posts", get(handlers::admin::posts_handler))
        .route("/api/admin/summary", get(handlers::admin::summary_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Gateway shutting down");
            })
            .await
        {
            tracing::error!("Gateway server error: {}", e);
        }
    });

    Ok(bound_addr)
}
