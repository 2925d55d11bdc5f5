//! Key handling error types.

use thiserror::Error;

/// Errors from key generation, encoding, and signature verification.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("PEM error: {0}")]
    Pem(String),

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("malformed Signature header: {0}")]
    MalformedHeader(String),

    #[error("missing signed header: {0}")]
    MissingHeader(String),

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("date skew too large: {0}s")]
    DateSkew(u64),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Result type for key operations.
pub type KeyResult<T> = std::result::Result<T, KeyError>;
