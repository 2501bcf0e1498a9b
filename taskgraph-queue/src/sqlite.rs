//! SQLite-backed [`JobQueue`] — the one reference persistence backend this crate
//! ships (§4.4: "use a locked-row dequeue or compare-and-swap").
//!
//! Timestamps are stored as RFC3339 text, not `sqlx`'s `chrono` binding, matching
//! the rest of this codebase's SQLite persistence (SQLite has no native datetime
//! type and the two representations don't mix cleanly across migrations).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::job::{Job, JobOutcome, JobStatus, NewJob};
use crate::queue::JobQueue;

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: String,
    queue: String,
    job_type: String,
    input: String,
    output: Option<String>,
    fingerprint: String,
    status: String,
    run_attempts: i64,
    max_retries: i64,
    created_at: String,
    run_after: String,
    worker_id: Option<String>,
    last_ran_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            queue: self.queue,
            job_type: self.job_type,
            input: serde_json::from_str(&self.input).map_err(|e| QueueError::Configuration(format!("malformed job input: {e}")))?,
            output: self.output.as_deref().map(serde_json::from_str).transpose().map_err(|e| QueueError::Configuration(format!("malformed job output: {e}")))?,
            fingerprint: self.fingerprint,
            status: JobStatus::parse(&self.status)
                .ok_or_else(|| QueueError::Configuration(format!("unknown job status '{}'", self.status)))?,
            run_attempts: self.run_attempts,
            max_retries: self.max_retries,
            created_at: parse_rfc3339(&self.created_at)?,
            run_after: parse_rfc3339(&self.run_after)?,
            worker_id: self.worker_id,
            last_ran_at: self.last_ran_at.as_deref().map(parse_rfc3339).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_rfc3339).transpose()?,
            error: self.error,
        })
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Configuration(format!("malformed timestamp '{raw}': {e}")))
}

/// A `sqlx`-backed job queue over a SQLite connection pool.
pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    /// Connect to `database_url` (e.g. `sqlite::memory:` or `sqlite:jobs.db`) and run
    /// the crate's bundled migrations.
    ///
    /// `:memory:` databases are pinned to a single pooled connection: each physical
    /// connection to an in-memory SQLite database is its own separate database, so a
    /// pool with more than one connection would silently partition the data.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let max_connections = if database_url.contains("memory") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(database_url).await?;
        let queue = Self { pool };
        queue.migrate().await?;
        Ok(queue)
    }

    /// Wrap an already-open pool (migrations are the caller's responsibility).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn add(&self, job: NewJob) -> Result<Job> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let fingerprint = job.fingerprint();
        let input_json = serde_json::to_string(&job.input).map_err(|e| QueueError::Configuration(e.to_string()))?;

        let row: JobRow = sqlx::query_as(
            "INSERT INTO jobs (id, queue, job_type, input, fingerprint, status, run_attempts, max_retries, created_at, run_after)
             VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
             RETURNING *",
        )
        .bind(&id)
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(&input_json)
        .bind(&fingerprint)
        .bind(job.max_retries)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = %id, queue = %job.queue, "job added");
        row.into_job()
    }

    async fn next(&self, queue: &str, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now().to_rfc3339();
        let row: Option<JobRow> = sqlx::query_as(
            "UPDATE jobs
             SET status = 'processing', worker_id = ?, last_ran_at = ?
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = ? AND status = 'pending' AND run_after <= ?
                 ORDER BY run_after ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(worker_id)
        .bind(&now)
        .bind(queue)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!(job_id = %row.id, worker_id, "job dequeued");
                Ok(Some(row.into_job()?))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: &str, outcome: JobOutcome) -> Result<()> {
        let now = Utc::now();
        match outcome {
            JobOutcome::Completed { output } => {
                let output_json = serde_json::to_string(&output).map_err(|e| QueueError::Configuration(e.to_string()))?;
                sqlx::query("UPDATE jobs SET status = 'completed', output = ?, completed_at = ?, error = NULL WHERE id = ?")
                    .bind(&output_json)
                    .bind(now.to_rfc3339())
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
                debug!(job_id, "job completed");
            }
            JobOutcome::Permanent { error } => {
                sqlx::query("UPDATE jobs SET status = 'failed', error = ?, completed_at = ? WHERE id = ?")
                    .bind(&error)
                    .bind(now.to_rfc3339())
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
                warn!(job_id, %error, "job failed permanently");
            }
            JobOutcome::Retryable { error, retry_after } => {
                let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
                let Some(row) = row else {
                    return Err(QueueError::NotFound(job_id.to_string()));
                };
                let attempts = row.run_attempts + 1;
                if attempts < row.max_retries {
                    let run_after = retry_after.unwrap_or(now).max(now);
                    sqlx::query(
                        "UPDATE jobs SET status = 'pending', run_attempts = ?, run_after = ?, worker_id = NULL, error = ? WHERE id = ?",
                    )
                    .bind(attempts)
                    .bind(run_after.to_rfc3339())
                    .bind(&error)
                    .bind(job_id)
                    .execute(&self.pool)
                    .await?;
                    debug!(job_id, attempts, run_after = %run_after, "job re-queued after retryable failure");
                } else {
                    sqlx::query("UPDATE jobs SET status = 'failed', run_attempts = ?, error = ?, completed_at = ? WHERE id = ?")
                        .bind(attempts)
                        .bind(&error)
                        .bind(now.to_rfc3339())
                        .bind(job_id)
                        .execute(&self.pool)
                        .await?;
                    warn!(job_id, attempts, "job failed after exhausting retries");
                }
            }
        }
        Ok(())
    }

    async fn abort(&self, job_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = 'aborting' WHERE id = ? AND status != 'completed' AND status != 'failed'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn output_for_input(&self, job_type: &str, input: &Value) -> Result<Option<Value>> {
        let fingerprint = taskgraph_store::fingerprint(job_type, input);
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE job_type = ? AND fingerprint = ? AND status = 'completed' ORDER BY completed_at DESC LIMIT 1",
        )
        .bind(job_type)
        .bind(&fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_job()).transpose().map(|job| job.and_then(|j| j.output))
    }

    async fn peek(&self, queue: &str, status: JobStatus, n: usize) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE queue = ? AND status = ? ORDER BY run_after ASC, created_at ASC LIMIT ?",
        )
        .bind(queue)
        .bind(status.as_str())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn size(&self, queue: &str, status: JobStatus) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE queue = ? AND status = ?")
            .bind(queue)
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn reclaim_stale(&self, stale_after_secs: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(stale_after_secs);
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', worker_id = NULL
             WHERE status = 'processing' AND (last_ran_at IS NULL OR last_ran_at <= ?)",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        let reclaimed = result.rows_affected() as usize;
        if reclaimed > 0 {
            info!(reclaimed, "swept stale jobs back to pending");
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn queue() -> SqliteJobQueue {
        SqliteJobQueue::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_then_next_dequeues_the_job() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({"url": "x"}))).await.unwrap();
        let dequeued = q.next("fetch", "worker-1").await.unwrap().unwrap();
        assert_eq!(dequeued.id, job.id);
        assert_eq!(dequeued.status, JobStatus::Processing);
        assert_eq!(dequeued.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn next_is_exactly_once_across_concurrent_workers() {
        let q = std::sync::Arc::new(queue().await);
        q.add(NewJob::new("fetch", "HttpFetch", json!({"url": "x"}))).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.next("fetch", &format!("worker-{i}")).await.unwrap() }));
        }
        let mut claims = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claims += 1;
            }
        }
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn complete_with_retryable_requeues_until_max_retries_then_fails() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({})).with_max_retries(2)).await.unwrap();

        q.next("fetch", "w1").await.unwrap();
        q.complete(&job.id, JobOutcome::Retryable { error: "503".to_string(), retry_after: None }).await.unwrap();
        let after_first = q.get(&job.id).await.unwrap().unwrap();
        assert_eq!(after_first.status, JobStatus::Pending);
        assert_eq!(after_first.run_attempts, 1);

        q.next("fetch", "w1").await.unwrap();
        q.complete(&job.id, JobOutcome::Retryable { error: "503".to_string(), retry_after: None }).await.unwrap();
        let after_second = q.get(&job.id).await.unwrap().unwrap();
        assert_eq!(after_second.status, JobStatus::Failed);
        assert_eq!(after_second.run_attempts, 2);
    }

    #[tokio::test]
    async fn complete_with_permanent_fails_immediately() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({})).with_max_retries(5)).await.unwrap();
        q.next("fetch", "w1").await.unwrap();
        q.complete(&job.id, JobOutcome::Permanent { error: "401".to_string() }).await.unwrap();
        let job = q.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.run_attempts, 0);
    }

    #[tokio::test]
    async fn output_for_input_reuses_completed_results_by_fingerprint() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({"url": "x"}))).await.unwrap();
        q.next("fetch", "w1").await.unwrap();
        q.complete(&job.id, JobOutcome::Completed { output: json!({"body": "ok"}) }).await.unwrap();

        let reused = q.output_for_input("HttpFetch", &json!({"url": "x"})).await.unwrap();
        assert_eq!(reused, Some(json!({"body": "ok"})));
        assert_eq!(q.output_for_input("HttpFetch", &json!({"url": "y"})).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reclaim_stale_resets_abandoned_processing_jobs() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({}))).await.unwrap();
        q.next("fetch", "worker-dead").await.unwrap();

        sqlx::query("UPDATE jobs SET last_ran_at = ? WHERE id = ?")
            .bind((Utc::now() - chrono::Duration::seconds(120)).to_rfc3339())
            .bind(&job.id)
            .execute(q.pool())
            .await
            .unwrap();

        let reclaimed = q.reclaim_stale(60).await.unwrap();
        assert_eq!(reclaimed, 1);
        let job = q.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn abort_marks_an_in_flight_job_aborting() {
        let q = queue().await;
        let job = q.add(NewJob::new("fetch", "HttpFetch", json!({}))).await.unwrap();
        q.next("fetch", "w1").await.unwrap();
        q.abort(&job.id).await.unwrap();
        let job = q.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Aborting);
    }
}
