//! Error type shared by the repository and cache abstractions.

use thiserror::Error;

/// Errors surfaced by [`crate::Repository`] and [`crate::TaskOutputCache`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The stored blob failed to deserialize into the shape the caller expected.
    #[error("malformed value for key {key}: {reason}")]
    Malformed {
        /// Key whose value failed validation.
        key: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A search predicate referenced a field or operator the backend cannot evaluate.
    #[error("invalid search predicate: {0}")]
    InvalidPredicate(String),

    /// The underlying backend (filesystem, SQL, network) failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout `taskgraph-store`.
pub type Result<T> = std::result::Result<T, StoreError>;
