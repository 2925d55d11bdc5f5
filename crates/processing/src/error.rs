//! Processing error types.

use postbox_storage::StorageError;
use thiserror::Error;

/// Errors from activity validation and side-effect application.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Storage errors propagate unchanged; the HTTP layer maps kinds to
    /// status codes.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The actor is authenticated but not permitted to perform this
    /// activity on its target.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The activity is structurally invalid for its type.
    #[error("invalid activity: {0}")]
    InvalidActivity(String),

    /// The activity type has no processing contract.
    #[error("unsupported activity type: {0}")]
    Unsupported(String),
}

/// Result type for processing operations.
pub type ProcessingResult<T> = std::result::Result<T, ProcessingError>;
