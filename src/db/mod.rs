//! Storage traits and row types.
//!
//! Handlers depend on these traits, not on PostgreSQL directly; `PgStore` is
//! the production implementation. Tests stub individual traits where the
//! behavior under storage failure matters (the admin check must fail closed).

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;

use crate::error::{CredentialError, DatabaseError};

pub use postgres::PgStore;

/// Which credential column a save/get targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Regular,
    Admin,
}

/// Presence flags for a user's stored credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyStatus {
    pub has_api_key: bool,
    pub has_admin_key: bool,
}

/// Aggregated usage counters for one user over some span.
#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub total_requests: i64,
    pub total_tokens: i64,
    pub estimated_cost: Decimal,
    pub last_used: Option<DateTime<Utc>>,
}

/// One entry in a user's ordered pin list.
#[derive(Debug, Clone)]
pub struct PinnedStock {
    pub symbol: String,
    pub position: i32,
    pub pinned_at: DateTime<Utc>,
}

/// An authenticated caller, resolved from a session token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: Option<String>,
}

/// Encrypted per-user LLM credentials, at most one row per user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Validate, encrypt, and upsert one key column without disturbing the
    /// other. Rejects plaintext lacking the `sk-` prefix before any write.
    async fn save_key(
        &self,
        user_id: &str,
        plaintext: &str,
        key_type: KeyType,
    ) -> Result<(), CredentialError>;

    /// Remove the whole credential row (both key types).
    async fn delete_key(&self, user_id: &str) -> Result<(), DatabaseError>;

    /// Decrypt the stored key of the given type. A missing row or unset
    /// column is `None`, not an error.
    async fn get_decrypted_key(
        &self,
        user_id: &str,
        key_type: KeyType,
    ) -> Result<Option<SecretString>, CredentialError>;

    async fn key_status(&self, user_id: &str) -> Result<KeyStatus, DatabaseError>;
}

/// Per-user, per-day usage counters. Writes are single atomic statements so
/// concurrent increments are never lost.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record_usage(
        &self,
        user_id: &str,
        tokens: i64,
        cost: Decimal,
    ) -> Result<(), DatabaseError>;

    /// All-time aggregate; all-zero (never an error) on empty history.
    async fn summary(&self, user_id: &str) -> Result<UsageSummary, DatabaseError>;

    /// Aggregate over the trailing `window_days`.
    async fn recent_summary(
        &self,
        user_id: &str,
        window_days: i32,
    ) -> Result<UsageSummary, DatabaseError>;
}

/// A user's pinned symbols with a dense 0..N-1 ordering.
#[async_trait]
pub trait PinStore: Send + Sync {
    async fn list_pins(&self, user_id: &str) -> Result<Vec<PinnedStock>, DatabaseError>;

    /// Append the symbol at the end of the list; a repeat pin is a silent
    /// no-op. Returns the normalized (uppercased) symbol.
    async fn pin(&self, user_id: &str, symbol: &str) -> Result<String, DatabaseError>;

    /// Remove the symbol and renumber the remaining pins to 0..N-1, inside
    /// one transaction so a crash cannot leave a gap.
    async fn unpin(&self, user_id: &str, symbol: &str) -> Result<(), DatabaseError>;
}

/// Session and role lookups against the auth tables.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Resolve a session token to an identity; `None` for unknown or
    /// expired tokens.
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, DatabaseError>;

    /// The stored role for a user, if any.
    async fn user_role(&self, user_id: &str) -> Result<Option<String>, DatabaseError>;
}

/// Unified storage surface handed to the HTTP layer.
#[async_trait]
pub trait Store: CredentialStore + UsageLedger + PinStore + RoleStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

/// The administrator role value checked by the access gate.
pub const ADMIN_ROLE: &str = "admin";
