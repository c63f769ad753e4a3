//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object row does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A conditional write was rejected.
    #[error("conditional check failed: {0}")]
    ConditionFailed(String),

    /// The store could not commit because of competing writers.
    #[error("store contention: {0}")]
    Contention(String),

    /// The store is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The page request is invalid.
    #[error("invalid page request: {0}")]
    InvalidPage(String),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Contention(_) | StoreError::Unavailable(_))
    }
}
