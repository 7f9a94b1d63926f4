//! Error types for the Akleao gateway.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Envelope encryption errors.
///
/// Variants are deliberately coarse: callers only need to distinguish
/// "operator misconfigured the key" from "this envelope cannot be trusted".
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption key must be {expected} hex characters, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Encryption key is not valid hex")]
    InvalidKeyEncoding,

    #[error("Malformed ciphertext envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed: ciphertext rejected")]
    DecryptFailed,
}

/// Credential store errors, layered over crypto and storage failures so the
/// HTTP boundary can map format problems to 400 and the rest to 500.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid API key format: expected an 'sk-' prefixed key")]
    InvalidKeyFormat,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Authentication/authorization errors. Fail closed: no detail beyond the class.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    MissingSession,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Admin access required")]
    Forbidden,
}

/// Errors talking to external collaborators (backend, market data, LLM).
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} request failed: {reason}")]
    RequestFailed {
        service: &'static str,
        reason: String,
    },

    #[error("{service} returned status {status}")]
    BadStatus { service: &'static str, status: u16 },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
