//! PostgreSQL implementation of the storage traits.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use secrecy::SecretString;
use tokio_postgres::{NoTls, Row};

use crate::config::DatabaseConfig;
use crate::crypto::KeyCipher;
use crate::db::{
    CredentialStore, Identity, KeyStatus, KeyType, PinStore, PinnedStock, RoleStore, Store,
    UsageLedger, UsageSummary,
};
use crate::error::{CredentialError, DatabaseError};

/// PostgreSQL-backed store.
///
/// Owns the connection pool (built once at startup, injected everywhere by
/// `Arc`) and the envelope cipher, so plaintext credentials never leave this
/// module except wrapped in `SecretString`.
pub struct PgStore {
    pool: Pool,
    cipher: KeyCipher,
}

impl PgStore {
    /// Create a store from configuration. The pool is lazy: connections are
    /// established on first use, so this does not touch the network.
    pub fn new(config: &DatabaseConfig, cipher: KeyCipher) -> Result<Self, DatabaseError> {
        let pg_config = tokio_postgres::Config::from_str(&config.url)
            .map_err(|e| DatabaseError::Pool(format!("invalid DATABASE_URL: {e}")))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()?;
        Ok(Self { pool, cipher })
    }

    async fn conn(&self) -> Result<Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }

    fn row_to_summary(row: &Row) -> UsageSummary {
        UsageSummary {
            total_requests: row.get("total_requests"),
            total_tokens: row.get("total_tokens"),
            estimated_cost: row.get("estimated_cost"),
            last_used: row.get::<_, Option<DateTime<Utc>>>("last_used"),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS "user" (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                role TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS session (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS user_api_keys (
                user_id TEXT PRIMARY KEY REFERENCES "user"(id) ON DELETE CASCADE,
                encrypted_key TEXT,
                encrypted_admin_key TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS openai_usage (
                user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
                usage_date DATE NOT NULL,
                request_count INTEGER NOT NULL DEFAULT 0,
                tokens_used BIGINT NOT NULL DEFAULT 0,
                estimated_cost NUMERIC(14, 6) NOT NULL DEFAULT 0,
                last_request_at TIMESTAMPTZ,
                PRIMARY KEY (user_id, usage_date)
            );
            CREATE TABLE IF NOT EXISTS pinned_stocks (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES "user"(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                position INTEGER NOT NULL,
                pinned_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_id, symbol)
            );
            CREATE INDEX IF NOT EXISTS idx_session_user ON session(user_id);
            CREATE INDEX IF NOT EXISTS idx_pinned_stocks_user
                ON pinned_stocks(user_id, position);
            CREATE INDEX IF NOT EXISTS idx_openai_usage_last
                ON openai_usage(user_id, last_request_at);
            "#,
        )
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

// ==================== CredentialStore ====================

/// All provider keys (regular and admin) carry this prefix.
const KEY_PREFIX: &str = "sk-";

#[async_trait]
impl CredentialStore for PgStore {
    async fn save_key(
        &self,
        user_id: &str,
        plaintext: &str,
        key_type: KeyType,
    ) -> Result<(), CredentialError> {
        let plaintext = plaintext.trim();
        if !plaintext.starts_with(KEY_PREFIX) {
            return Err(CredentialError::InvalidKeyFormat);
        }
        let envelope = self.cipher.encrypt(plaintext)?;

        // Upsert only the targeted column; the other key survives untouched.
        let sql = match key_type {
            KeyType::Regular => {
                r#"
                INSERT INTO user_api_keys (user_id, encrypted_key, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id) DO UPDATE SET
                    encrypted_key = EXCLUDED.encrypted_key,
                    updated_at = NOW()
                "#
            }
            KeyType::Admin => {
                r#"
                INSERT INTO user_api_keys (user_id, encrypted_admin_key, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id) DO UPDATE SET
                    encrypted_admin_key = EXCLUDED.encrypted_admin_key,
                    updated_at = NOW()
                "#
            }
        };

        let conn = self.conn().await.map_err(CredentialError::Database)?;
        conn.execute(sql, &[&user_id, &envelope])
            .await
            .map_err(|e| CredentialError::Database(e.into()))?;
        Ok(())
    }

    async fn delete_key(&self, user_id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute("DELETE FROM user_api_keys WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(())
    }

    async fn get_decrypted_key(
        &self,
        user_id: &str,
        key_type: KeyType,
    ) -> Result<Option<SecretString>, CredentialError> {
        let column = match key_type {
            KeyType::Regular => "encrypted_key",
            KeyType::Admin => "encrypted_admin_key",
        };
        let conn = self.conn().await.map_err(CredentialError::Database)?;
        let row = conn
            .query_opt(
                &format!("SELECT {column} FROM user_api_keys WHERE user_id = $1"),
                &[&user_id],
            )
            .await
            .map_err(|e| CredentialError::Database(e.into()))?;

        match row.and_then(|r| r.get::<_, Option<String>>(0)) {
            Some(envelope) => Ok(Some(self.cipher.decrypt(&envelope)?)),
            None => Ok(None),
        }
    }

    async fn key_status(&self, user_id: &str) -> Result<KeyStatus, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT encrypted_key IS NOT NULL AS has_api_key, \
                        encrypted_admin_key IS NOT NULL AS has_admin_key \
                 FROM user_api_keys WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(row
            .map(|r| KeyStatus {
                has_api_key: r.get("has_api_key"),
                has_admin_key: r.get("has_admin_key"),
            })
            .unwrap_or_default())
    }
}

// ==================== UsageLedger ====================

#[async_trait]
impl UsageLedger for PgStore {
    async fn record_usage(
        &self,
        user_id: &str,
        tokens: i64,
        cost: Decimal,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        // One atomic statement: two concurrent writers both land their
        // increments, no read-modify-write window.
        conn.execute(
            r#"
            INSERT INTO openai_usage
                (user_id, usage_date, request_count, tokens_used, estimated_cost, last_request_at)
            VALUES ($1, CURRENT_DATE, 1, $2, $3, NOW())
            ON CONFLICT (user_id, usage_date) DO UPDATE SET
                request_count = openai_usage.request_count + 1,
                tokens_used = openai_usage.tokens_used + EXCLUDED.tokens_used,
                estimated_cost = openai_usage.estimated_cost + EXCLUDED.estimated_cost,
                last_request_at = NOW()
            "#,
            &[&user_id, &tokens, &cost],
        )
        .await?;
        Ok(())
    }

    async fn summary(&self, user_id: &str) -> Result<UsageSummary, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                r#"
                SELECT
                    COALESCE(SUM(request_count), 0)::BIGINT AS total_requests,
                    COALESCE(SUM(tokens_used), 0)::BIGINT AS total_tokens,
                    COALESCE(SUM(estimated_cost), 0)::NUMERIC AS estimated_cost,
                    MAX(last_request_at) AS last_used
                FROM openai_usage
                WHERE user_id = $1
                "#,
                &[&user_id],
            )
            .await?;
        Ok(Self::row_to_summary(&row))
    }

    async fn recent_summary(
        &self,
        user_id: &str,
        window_days: i32,
    ) -> Result<UsageSummary, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                r#"
                SELECT
                    COALESCE(SUM(request_count), 0)::BIGINT AS total_requests,
                    COALESCE(SUM(tokens_used), 0)::BIGINT AS total_tokens,
                    COALESCE(SUM(estimated_cost), 0)::NUMERIC AS estimated_cost,
                    MAX(last_request_at) AS last_used
                FROM openai_usage
                WHERE user_id = $1
                  AND last_request_at >= NOW() - make_interval(days => $2)
                "#,
                &[&user_id, &window_days],
            )
            .await?;
        Ok(Self::row_to_summary(&row))
    }
}

// ==================== PinStore ====================

#[async_trait]
impl PinStore for PgStore {
    async fn list_pins(&self, user_id: &str) -> Result<Vec<PinnedStock>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT symbol, position, pinned_at FROM pinned_stocks \
                 WHERE user_id = $1 ORDER BY position ASC",
                &[&user_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| PinnedStock {
                symbol: r.get("symbol"),
                position: r.get("position"),
                pinned_at: r.get("pinned_at"),
            })
            .collect())
    }

    async fn pin(&self, user_id: &str, symbol: &str) -> Result<String, DatabaseError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let conn = self.conn().await?;
        // Max-position computation and insert in one statement, so two
        // concurrent pins cannot read the same max. A repeat pin hits the
        // unique constraint and is dropped silently.
        conn.execute(
            r#"
            INSERT INTO pinned_stocks (user_id, symbol, position)
            SELECT $1, $2, COALESCE(MAX(position), -1) + 1
            FROM pinned_stocks
            WHERE user_id = $1
            ON CONFLICT (user_id, symbol) DO NOTHING
            "#,
            &[&user_id, &symbol],
        )
        .await?;
        Ok(symbol)
    }

    async fn unpin(&self, user_id: &str, symbol: &str) -> Result<(), DatabaseError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let mut conn = self.conn().await?;
        // Delete and re-rank commit together: readers never observe a gap.
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM pinned_stocks WHERE user_id = $1 AND symbol = $2",
            &[&user_id, &symbol],
        )
        .await?;
        tx.execute(
            r#"
            UPDATE pinned_stocks
            SET position = ranked.new_position
            FROM (
                SELECT id, (ROW_NUMBER() OVER (ORDER BY position) - 1)::INT AS new_position
                FROM pinned_stocks
                WHERE user_id = $1
            ) AS ranked
            WHERE pinned_stocks.id = ranked.id
            "#,
            &[&user_id],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ==================== RoleStore ====================

#[async_trait]
impl RoleStore for PgStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT s.user_id, u.role
                FROM session s
                JOIN "user" u ON u.id = s.user_id
                WHERE s.token = $1 AND s.expires_at > NOW()
                "#,
                &[&token],
            )
            .await?;
        Ok(row.map(|r| Identity {
            user_id: r.get("user_id"),
            role: r.get("role"),
        }))
    }

    async fn user_role(&self, user_id: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT role FROM \"user\" WHERE id = $1", &[&user_id])
            .await?;
        Ok(row.and_then(|r| r.get(0)))
    }
}
