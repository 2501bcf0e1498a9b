//! Stale-job sweeper (§4.4: "A separate sweeper reclaims jobs whose worker ID has
//! not heartbeat within a configured timeout").

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::JobQueue;

/// Periodically calls [`JobQueue::reclaim_stale`] on a background task.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweeper that checks every `interval`, reclaiming jobs whose
    /// `last_ran_at` is older than `stale_after`.
    pub fn spawn(queue: Arc<dyn JobQueue>, interval: Duration, stale_after: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match queue.reclaim_stale(stale_after.as_secs() as i64).await {
                    Ok(reclaimed) if reclaimed > 0 => {
                        info!(reclaimed, "sweeper reclaimed stale jobs");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "sweeper failed to reclaim stale jobs"),
                }
            }
        });
        Self { handle }
    }

    /// Stop the sweeper. Dropping the handle without calling this leaves the
    /// background task running until the process exits.
    pub fn stop(self) {
        self.handle.abort();
    }
}
