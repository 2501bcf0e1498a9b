//! Tree-structured cancellation tokens (§5 "Cancellation semantics").
//!
//! A single token is scoped to a whole graph run. A child graph (compound task)
//! inherits a token derived from its parent task's token, so cancelling the parent
//! cancels every descendant without the reverse being true. This is exactly
//! `tokio_util::sync::CancellationToken`'s `child_token()` relationship; we re-export
//! it under a project-local name so call sites don't reach across crates for it.

pub use tokio_util::sync::CancellationToken as CancelToken;

/// Create a fresh root cancellation token for a new graph run.
pub fn root_token() -> CancelToken {
    CancelToken::new()
}
