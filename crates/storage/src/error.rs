//! Storage error taxonomy.
//!
//! Errors are distinguished by the public contract, not by backend type:
//! the HTTP layer is the only place these kinds map to status codes.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The IRI has no stored item.
    #[error("not found: {0}")]
    NotFound(String),

    /// The IRI already exists, or the update is stale.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed input: non-local IRI, bad filter, undecodable payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Backend temporarily unavailable; idempotent reads may retry.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// Backend selection or initialisation failed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invariant violation or backend bug.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether an idempotent operation may retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Transient(e.to_string())
    }
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => StorageError::Transient(io.to_string()),
            other => StorageError::Internal(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
