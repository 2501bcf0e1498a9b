//! Error kinds shared by every `taskgraph-core` subsystem.
//!
//! These map directly onto `spec.md` §7: input validation and configuration errors
//! are always permanent and local to the failing task; `Aborted` is distinguished
//! from `Failed` because it represents an orderly, user-initiated shutdown rather
//! than a runtime fault.

use thiserror::Error;

/// Result alias used throughout `taskgraph-core`.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The error kinds a task or the scheduler can surface.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Input failed schema validation. Permanent; aborts the graph unless the task
    /// is marked optional.
    #[error("invalid input for task {task}: {reason}")]
    InvalidInput { task: String, reason: String },

    /// The graph or task definition itself is malformed (cycle, dangling edge,
    /// duplicate ID, incompatible ports). Permanent, local to the offending node.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Execution was cancelled via a [`crate::cancel::CancelToken`]. Distinct from
    /// [`GraphError::Failed`] — an orderly shutdown, not a fault.
    #[error("aborted: {0}")]
    Aborted(String),

    /// `execute`/`executeStream` raised an error. Carries the original cause.
    #[error("task {task} failed: {source}")]
    Failed {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    /// A task's configured deadline elapsed before it finished.
    #[error("task {task} timed out after {elapsed_ms}ms")]
    Timeout { task: String, elapsed_ms: u64 },

    /// A task did not respond to cancellation within the scheduler's grace period.
    #[error("task {task} failed to terminate within the grace period")]
    Hang { task: String },

    /// A streaming producer overflowed a consumer's bounded tee buffer.
    #[error("backpressure: producer {producer} overflowed consumer buffer for port {port}")]
    Backpressure { producer: String, port: String },

    /// Lookup of a task, port, service, or checkpoint failed.
    #[error("not found: {0}")]
    NotFound(String),
}

impl GraphError {
    /// `true` for error kinds §7 classifies as permanent (never retried, always
    /// local to the failing task).
    pub fn is_permanent(&self) -> bool {
        matches!(self, GraphError::InvalidInput { .. } | GraphError::Configuration(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, GraphError::Aborted(_))
    }
}

impl From<taskgraph_store::StoreError> for GraphError {
    fn from(err: taskgraph_store::StoreError) -> Self {
        // Repository/cache failures at the task level are never fatal to the graph
        // (spec.md §4.1: "Cache read failure -> log, treat as miss"); callers that
        // need the graph to fail on a store error construct `Configuration`/`Failed`
        // themselves. This conversion exists for call sites (e.g. the compound-task
        // merge path) that do want the store error to propagate as a hard failure.
        GraphError::Failed {
            task: "<repository>".to_string(),
            source: anyhow::anyhow!(err),
        }
    }
}
