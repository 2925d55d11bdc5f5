//! Core error types.

use thiserror::Error;

/// Errors produced by the core domain types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid IRI: {0}")]
    InvalidIri(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
