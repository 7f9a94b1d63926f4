//! Session resolution and role checks.
//!
//! Sessions are issued by the auth frontend and stored in the `session`
//! table. We accept the session token from the auth cookie first, then from
//! a `Bearer` header, and attach the resolved [`Identity`] to the request.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

use crate::db::{Identity, RoleStore, ADMIN_ROLE};
use crate::error::AuthError;

/// Cookie name used by the auth frontend.
pub const SESSION_COOKIE: &str = "better-auth.session_token";

/// Pull the session token out of the request headers.
///
/// Cookie wins over the Authorization header when both are present, matching
/// how browser clients send it.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie_header) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookie_header.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE && !value.is_empty() {
                    // Signed cookies carry a `token.signature` suffix; the
                    // session table stores only the token part.
                    let token = value.split('.').next().unwrap_or(value);
                    return Some(token.to_string());
                }
            }
        }
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Resolve the request's session into an identity, failing closed.
pub async fn authenticate<S: RoleStore + ?Sized>(
    store: &S,
    headers: &HeaderMap,
) -> Result<Identity, AuthError> {
    let token = extract_token(headers).ok_or(AuthError::MissingSession)?;
    match store.resolve_session(&token).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(AuthError::InvalidSession),
        Err(err) => {
            tracing::warn!(error = %err, "session lookup failed");
            Err(AuthError::InvalidSession)
        }
    }
}

/// Whether the user holds the admin role. Any lookup failure counts as
/// not-admin; this check never grants on error.
pub async fn is_admin<S: RoleStore + ?Sized>(store: &S, user_id: &str) -> bool {
    match store.user_role(user_id).await {
        Ok(Some(role)) => role == ADMIN_ROLE,
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "role lookup failed, denying admin");
            false
        }
    }
}

/// Gate for admin-only routes.
pub async fn require_admin<S: RoleStore + ?Sized>(
    store: &S,
    user_id: &str,
) -> Result<(), AuthError> {
    if is_admin(store, user_id).await {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
