//! Job model (§4.4 "JobQueue"): a persisted unit of work, addressable by fingerprint
//! for cross-run output reuse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskgraph_store::fingerprint;

pub type JobId = String;

/// A job's lifecycle status. `Pending` jobs with `run_after <= now` are eligible for
/// `next()`; `Aborting` is set by `abort()` and observed by the worker loop, which
/// transitions the job to `Failed` once it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Aborting,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Aborting => "aborting",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "aborting" => Some(JobStatus::Aborting),
            _ => None,
        }
    }
}

/// A new job as submitted by a caller, before the queue stamps identity and timing.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub job_type: String,
    pub input: Value,
    pub max_retries: i64,
}

impl NewJob {
    pub fn new(queue: impl Into<String>, job_type: impl Into<String>, input: Value) -> Self {
        Self {
            queue: queue.into(),
            job_type: job_type.into(),
            input,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.job_type, &self.input)
    }
}

/// A persisted job, as returned by every [`crate::queue::JobQueue`] operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub job_type: String,
    pub input: Value,
    pub output: Option<Value>,
    pub fingerprint: String,
    pub status: JobStatus,
    pub run_attempts: i64,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,
    pub run_after: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub last_ran_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// The outcome a worker reports to [`crate::queue::JobQueue::complete`] (§7 retry
/// taxonomy): a successful result, a retryable failure (re-queued with backoff up to
/// `max_retries`), or a permanent failure (never retried).
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { output: Value },
    Retryable { error: String, retry_after: Option<DateTime<Utc>> },
    Permanent { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_status_round_trips_through_its_string_form() {
        for status in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed, JobStatus::Failed, JobStatus::Aborting] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn new_job_fingerprint_matches_the_store_crate() {
        let job = NewJob::new("fetch", "HttpFetch", json!({"url": "https://example.com"}));
        assert_eq!(job.fingerprint(), fingerprint("HttpFetch", &json!({"url": "https://example.com"})));
    }
}
