use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by every store backend.
///
/// A save that matches an existing active target is not an error; it is
/// reported through [`SaveOutcome::conflict`][crate::SaveOutcome].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The id (or the owner's partition) was never created.
    #[error("not found")]
    NotFound,
    /// The id exists but has been tombstoned.
    #[error("record deleted")]
    Deleted,
    /// A batch save did not yield one id per input.
    #[error("batch saved {actual} of {expected} urls")]
    PartialBatch { expected: usize, actual: usize },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}
