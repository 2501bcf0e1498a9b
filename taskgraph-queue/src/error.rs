//! Error type shared by the job queue, rate limiter, and retry modules.

use thiserror::Error;

/// Result alias used throughout `taskgraph-queue`.
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The requested job does not exist.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The queue or rate-limiter configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The underlying storage backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),

    /// Migration failed to apply.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
