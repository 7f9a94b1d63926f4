//! Configuration for the Akleao gateway.
//!
//! Everything is resolved from environment variables (with `.env` loaded via
//! dotenvy early in startup). Resolution fails fast: a missing `DATABASE_URL`
//! or `ENCRYPTION_KEY` is a startup error, not a runtime surprise. In
//! particular there is no generated-key fallback for `ENCRYPTION_KEY` —
//! an ephemeral key would make every stored credential undecryptable after
//! the next restart.

use crate::crypto::KEY_HEX_LEN;
use crate::error::ConfigError;

/// Main configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub encryption: EncryptionConfig,
    pub upstream: UpstreamConfig,
}

/// HTTP server binding and CORS.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
    /// Requests per window for the explain endpoint. Zero switches the
    /// endpoint off entirely.
    pub explain_rate_limit: u64,
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: usize,
}

/// Key material for the credential envelope cipher.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// 64 hex characters (AES-256). Validated here so misconfiguration is
    /// caught before the first request, not on the first save.
    pub key_hex: String,
}

/// Base URLs and credentials for the three outbound collaborators.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// The external backend that owns scraping, sentiment, and positions.
    pub backend_url: String,
    /// Third-party market-data provider.
    pub market_data_url: String,
    pub market_data_api_key: Option<String>,
    /// LLM provider base URL (OpenAI-compatible).
    pub openai_url: String,
    /// Model used for metric explanations.
    pub explain_model: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            server: ServerConfig::resolve()?,
            database: DatabaseConfig::resolve()?,
            encryption: EncryptionConfig::resolve()?,
            upstream: UpstreamConfig::resolve()?,
        })
    }
}

impl ServerConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let host = optional_env("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_env("API_PORT", 8080u16)?;
        let cors_origins = optional_env("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);
        let explain_rate_limit = parse_env("EXPLAIN_RATE_LIMIT_PER_MINUTE", 60u64)?;
        Ok(Self {
            host,
            port,
            cors_origins,
            explain_rate_limit,
        })
    }
}

impl DatabaseConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let url = required_env(
            "DATABASE_URL",
            "Set it to a postgres:// connection string.",
        )?;
        let pool_size = parse_env("DATABASE_POOL_SIZE", 8usize)?;
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DATABASE_POOL_SIZE".to_string(),
                message: "must be > 0".to_string(),
            });
        }
        Ok(Self { url, pool_size })
    }
}

impl EncryptionConfig {
    fn resolve() -> Result<Self, ConfigError> {
        let key_hex = required_env(
            "ENCRYPTION_KEY",
            "Generate one with `openssl rand -hex 32` and keep it stable \
             across restarts; stored credentials are unrecoverable without it.",
        )?;
        let key_hex = key_hex.trim().to_string();
        if key_hex.len() != KEY_HEX_LEN || !key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue {
                key: "ENCRYPTION_KEY".to_string(),
                message: format!("must be exactly {KEY_HEX_LEN} hex characters"),
            });
        }
        Ok(Self { key_hex })
    }
}

impl UpstreamConfig {
    fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            backend_url: optional_env("API_GATEWAY_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            market_data_url: optional_env("MARKET_DATA_URL")
                .unwrap_or_else(|| "https://financialmodelingprep.com".to_string()),
            market_data_api_key: optional_env("MARKET_DATA_API_KEY"),
            openai_url: optional_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            explain_model: optional_env("EXPLAIN_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key).ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("ENCRYPTION_KEY");
            std::env::remove_var("API_PORT");
            std::env::remove_var("CORS_ORIGINS");
        }
    }

    #[test]
    fn encryption_key_is_required() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let err = EncryptionConfig::resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "ENCRYPTION_KEY"));
    }

    #[test]
    fn encryption_key_must_be_64_hex_chars() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("ENCRYPTION_KEY", "tooshort");
        }
        let err = EncryptionConfig::resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ENCRYPTION_KEY"));

        clear_env();
    }

    #[test]
    fn server_defaults_apply() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let server = ServerConfig::resolve().expect("server resolve");
        assert_eq!(server.port, 8080);
        assert_eq!(server.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(server.explain_rate_limit, 60);
    }

    #[test]
    fn cors_origins_split_on_commas() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var(
                "CORS_ORIGINS",
                "http://localhost:3000, https://app.example.com",
            );
        }
        let server = ServerConfig::resolve().expect("server resolve");
        assert_eq!(
            server.cors_origins,
            vec!["http://localhost:3000", "https://app.example.com"]
        );

        clear_env();
    }
}
