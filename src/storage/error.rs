//! Storage-specific error types.
//!
//! All driver operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, pool, validation, etc.).

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::pool::PoolError;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Connection pool error (busy, closed, connect failure).
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing driver configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Query is missing its tag.
    #[error("missing tag")]
    MissingTag,

    /// Invalid data in database (e.g., mismatched context columns).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether the operation failed before touching the backend and may be
    /// retried as is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pool(PoolError::Busy))
    }
}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(msg) => Self::Config(msg),
            other => Self::Config(other.to_string()),
        }
    }
}
