//! `taskgraph-queue` — persisted job queue, sliding-window rate limiter, and retry
//! taxonomy (§4.4) for tasks that push themselves off the interactive scheduler path:
//! long-running work, externally rate-limited APIs, anything that should survive a
//! process restart.
//!
//! [`job`] and [`queue`] are the contract; [`sqlite`] is the one backend this crate
//! ships. [`rate_limit`] gates dispatch independently of the queue itself, and
//! [`retry`]/[`retry_after`] classify failures into the taxonomy the queue acts on.
//! [`sweeper`] is the background task that reclaims abandoned in-flight jobs.

pub mod error;
pub mod job;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod retry_after;
pub mod sqlite;
pub mod sweeper;

pub use error::{QueueError, Result};
pub use job::{Job, JobId, JobOutcome, JobStatus, NewJob};
pub use queue::JobQueue;
pub use rate_limit::RateLimiter;
pub use retry::{classify_http_status, classify_transport_error, ErrorClass, DEFAULT_RETRY_DELAY_SECS};
pub use retry_after::parse_retry_after;
pub use sqlite::SqliteJobQueue;
pub use sweeper::Sweeper;
