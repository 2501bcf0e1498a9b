//! Sliding-window admission control, per queue (§4.4 "RateLimiter").
//!
//! Distinct from a token bucket: admission is decided from the age of the oldest
//! timestamp still inside the window, not from a refilling counter, which is what
//! lets `next_available` answer "when will a slot free up" instead of just "not now".

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

/// Per-queue sliding-window limiter plus the server-set backoff anchor (§4.4:
/// `nextAvailable` "reads a per-queue backoff anchor set by the server when an HTTP
/// 429/503 arrives").
pub struct RateLimiter {
    max_executions: usize,
    window: Duration,
    queues: DashMap<String, Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    executions: VecDeque<DateTime<Utc>>,
    backoff_until: Option<DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(max_executions: usize, window: Duration) -> Self {
        Self {
            max_executions,
            window,
            queues: DashMap::new(),
        }
    }

    fn entry(&self, queue: &str) -> dashmap::mapref::one::Ref<'_, String, Mutex<QueueState>> {
        self.queues.entry(queue.to_string()).or_default();
        self.queues.get(queue).expect("just inserted")
    }

    /// Record a dispatch against `queue`, appending `now` to its window.
    pub async fn record_execution(&self, queue: &str) {
        let entry = self.entry(queue);
        let mut state = entry.lock().await;
        state.executions.push_back(Utc::now());
        self.evict_expired(&mut state);
    }

    /// Count of executions recorded for `queue` since `window_start`.
    pub async fn get_execution_count(&self, queue: &str, window_start: DateTime<Utc>) -> usize {
        let entry = self.entry(queue);
        let mut state = entry.lock().await;
        self.evict_expired(&mut state);
        state.executions.iter().filter(|ts| **ts >= window_start).count()
    }

    /// The earliest time a new dispatch should be attempted: the later of the
    /// server-set backoff anchor (if still in the future) and the moment the oldest
    /// in-window execution ages out.
    pub async fn next_available(&self, queue: &str) -> DateTime<Utc> {
        let entry = self.entry(queue);
        let mut state = entry.lock().await;
        self.evict_expired(&mut state);

        let now = Utc::now();
        let from_window = if state.executions.len() < self.max_executions {
            now
        } else {
            state.executions.front().copied().unwrap_or(now) + chrono::Duration::from_std(self.window).unwrap_or_default()
        };
        match state.backoff_until {
            Some(anchor) if anchor > from_window => anchor,
            _ => from_window,
        }
    }

    /// Admission check: true if `queue` has capacity in the current window *and* no
    /// outstanding server backoff anchor is still in the future. Does not itself
    /// record an execution — callers call `record_execution` after a successful
    /// dispatch.
    pub async fn is_admissible(&self, queue: &str) -> bool {
        self.next_available(queue).await <= Utc::now()
    }

    /// Set (or clear, with `None`) the per-queue backoff anchor, e.g. from a 429/503
    /// `Retry-After`.
    pub async fn set_backoff_until(&self, queue: &str, anchor: Option<DateTime<Utc>>) {
        let entry = self.entry(queue);
        let mut state = entry.lock().await;
        state.backoff_until = anchor;
    }

    fn evict_expired(&self, state: &mut QueueState) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.window).unwrap_or_default();
        while matches!(state.executions.front(), Some(ts) if *ts < cutoff) {
            state.executions.pop_front();
        }
    }
}
