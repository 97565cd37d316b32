//! Error types for Recast

use thiserror::Error;

use crate::types::Provider;

pub type Result<T> = std::result::Result<T, RecastError>;

#[derive(Error, Debug)]
pub enum RecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Resync error: {0}")]
    Resync(#[from] ResyncError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Infrastructure-level persistence failures. These are the only errors
/// that abort a whole publish invocation instead of a single post.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no connected {provider} credential for this user")]
    NotConnected { provider: Provider },

    #[error("reconnection required: {0}")]
    ReauthRequired(String),

    #[error("token refresh temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("content rejected: {0}")]
    ContentInvalid(String),

    #[error("platform rejected the credential: {0}")]
    ReauthRequired(String),

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("platform rejected the request: {0}")]
    Upstream(String),
}

#[derive(Error, Debug)]
pub enum ResyncError {
    #[error("resync cooldown active, retry in {retry_after_ms}ms")]
    Cooldown { retry_after_ms: i64 },

    #[error("unknown feed connection: {0}")]
    UnknownConnection(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("feed fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("generation provider rejected the request: {0}")]
    Upstream(String),

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("malformed generation response: {0}")]
    InvalidResponse(String),
}
