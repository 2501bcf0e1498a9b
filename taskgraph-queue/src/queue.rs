//! The `JobQueue` contract (§4.4): per-queue persisted work items with
//! exactly-once dequeue and retry/backoff discipline.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::job::{Job, JobOutcome, JobStatus, NewJob};

/// A persisted, multi-worker-safe job queue.
///
/// Implementations must make `next` exactly-once under concurrent workers (§5
/// "job-queue dequeue must be exactly-once"); [`crate::sqlite::SqliteJobQueue`] is
/// the one reference backend this crate ships.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Persist `job`, stamping id, fingerprint, `created_at`, and `run_after = now`.
    async fn add(&self, job: NewJob) -> Result<Job>;

    /// Atomically claim the oldest `PENDING` job in `queue` whose `run_after <= now`,
    /// transition it to `PROCESSING`, and return it. Returns `None` if no job is
    /// eligible. `worker_id` is stamped for heartbeat/reclaim purposes.
    async fn next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>>;

    /// Report the outcome of running `job_id` (§7 retry taxonomy). A [`JobOutcome::Completed`]
    /// or permanent failure terminates the job; a retryable failure re-queues it with
    /// `run_after = max(now, retry_after)` if `run_attempts < max_retries`.
    async fn complete(&self, job_id: &str, outcome: JobOutcome) -> Result<()>;

    /// Mark a job `ABORTING`; a worker loop observes this and cancels the in-flight run.
    async fn abort(&self, job_id: &str) -> Result<()>;

    /// Fingerprint lookup for cross-run result reuse: the most recent `Completed`
    /// job's output for this `(job_type, input)` pair, if any.
    async fn output_for_input(&self, job_type: &str, input: &Value) -> Result<Option<Value>>;

    /// Observation: the `n` oldest jobs in `status`.
    async fn peek(&self, queue: &str, status: JobStatus, n: usize) -> Result<Vec<Job>>;

    /// Observation: count of jobs currently in `status`.
    async fn size(&self, queue: &str, status: JobStatus) -> Result<usize>;

    /// Look up a single job by id, for diagnostics and tests.
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;

    /// Reclaim `PROCESSING` jobs whose worker has not heartbeat within
    /// `stale_after_secs`, resetting them to `PENDING`. Returns the count reclaimed.
    /// Driven periodically by [`crate::sweeper::Sweeper`].
    async fn reclaim_stale(&self, stale_after_secs: i64) -> Result<usize>;
}
