//! S5 — Retry-After honoured: an HTTP fetch job receives a `429` with
//! `Retry-After: 30`. The job is re-queued with `run_after >= now + 30s`; on the
//! second admission the fetch succeeds; admissions observed by the rate limiter stay
//! within its window limit throughout.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use taskgraph_queue::{classify_http_status, ErrorClass, JobOutcome, JobQueue, JobStatus, NewJob, RateLimiter, SqliteJobQueue};

#[tokio::test]
async fn retry_after_is_honoured_across_a_rate_limited_second_admission() {
    let queue = SqliteJobQueue::connect("sqlite::memory:").await.unwrap();
    let limiter = RateLimiter::new(2, Duration::from_secs(60));

    let before_add = Utc::now();
    let job = queue
        .add(NewJob::new("fetch", "HttpFetch", json!({"url": "https://example.com"})).with_max_retries(3))
        .await
        .unwrap();

    assert!(limiter.is_admissible("fetch").await);
    limiter.record_execution("fetch").await;
    let dequeued = queue.next("fetch", "worker-1").await.unwrap().unwrap();
    assert_eq!(dequeued.id, job.id);

    // The fetch comes back 429 with Retry-After: 30.
    let classification = classify_http_status(429, Some("30"));
    let ErrorClass::Retryable { retry_after, .. } = classification else {
        panic!("429 must classify as retryable");
    };
    queue
        .complete(&job.id, JobOutcome::Retryable { error: "429".to_string(), retry_after })
        .await
        .unwrap();
    limiter.set_backoff_until("fetch", retry_after).await;

    let requeued = queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert!(requeued.run_after >= before_add + chrono::Duration::seconds(30));

    // Immediately after, the queue has nothing eligible (run_after is in the future)
    // and the limiter is also backing off — both gates agree.
    assert!(queue.next("fetch", "worker-1").await.unwrap().is_none());
    assert!(!limiter.is_admissible("fetch").await);

    // Fast-forward past the backoff window by rewriting run_after directly (standing
    // in for "time passes"), then the second admission succeeds exactly once.
    sqlx::query("UPDATE jobs SET run_after = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(&job.id)
        .execute(queue.pool())
        .await
        .unwrap();
    limiter.set_backoff_until("fetch", None).await;

    let retried = queue.next("fetch", "worker-1").await.unwrap().unwrap();
    assert_eq!(retried.id, job.id);
    assert_eq!(retried.run_attempts, 1);

    limiter.record_execution("fetch").await;
    queue.complete(&job.id, JobOutcome::Completed { output: json!({"status": 200}) }).await.unwrap();

    let done = queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.output, Some(json!({"status": 200})));

    // Exactly two admissions were recorded across the whole scenario, within the
    // limiter's max of 2 per window.
    assert_eq!(limiter.get_execution_count("fetch", before_add).await, 2);
}
