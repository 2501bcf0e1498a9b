//! Polling-based change subscriptions over a [`Repository`].
//!
//! A subscriber takes periodic snapshots of the durable repository and diffs them
//! against the previous snapshot to produce [`Change`] events. Callbacks for a given
//! subscriber are always invoked one at a time, in order — the poll loop awaits each
//! callback before scheduling the next tick.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::repository::Repository;

/// What happened to a key between two polls.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

/// A single row-level change detected by diffing two snapshots.
#[derive(Debug, Clone)]
pub struct Change {
    pub key: String,
    pub kind: ChangeKind,
    pub value: Option<Value>,
}

/// Callback invoked with a batch of changes from one poll tick.
pub type ChangeCallback = Arc<dyn Fn(Vec<Change>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`subscribe_to_changes`]. Dropping it does not stop the
/// subscription; call [`SubscriptionHandle::unsubscribe`] explicitly.
pub struct SubscriptionHandle {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Signal the poll loop to stop and wait for it to finish its current tick.
    pub async fn unsubscribe(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

fn diff(previous: &HashMap<String, Value>, current: &HashMap<String, Value>) -> Vec<Change> {
    let mut changes = Vec::new();
    for (key, value) in current {
        match previous.get(key) {
            None => changes.push(Change {
                key: key.clone(),
                kind: ChangeKind::Inserted,
                value: Some(value.clone()),
            }),
            Some(prev_value) if prev_value != value => changes.push(Change {
                key: key.clone(),
                kind: ChangeKind::Updated,
                value: Some(value.clone()),
            }),
            _ => {}
        }
    }
    for key in previous.keys() {
        if !current.contains_key(key) {
            changes.push(Change {
                key: key.clone(),
                kind: ChangeKind::Removed,
                value: None,
            });
        }
    }
    changes
}

/// Start polling `repo` every `poll_interval`, invoking `callback` with any detected
/// changes. Matches `spec.md` §4.4's `subscribeToChanges(callback, {pollIntervalMs?})`.
pub fn subscribe_to_changes<R>(repo: Arc<R>, callback: ChangeCallback, poll_interval: Duration) -> SubscriptionHandle
where
    R: Repository + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();

    let task = tokio::spawn(async move {
        let mut previous: HashMap<String, Value> = HashMap::new();
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            if stop_clone.load(Ordering::SeqCst) {
                break;
            }
            let current: HashMap<String, Value> = match repo.get_all().await {
                Ok(rows) => rows.into_iter().collect(),
                Err(err) => {
                    warn!(%err, "change subscription poll failed");
                    continue;
                }
            };
            let changes = diff(&previous, &current);
            previous = current;
            if !changes.is_empty() {
                callback(changes).await;
            }
        }
    });

    SubscriptionHandle { stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn detects_insert_update_and_remove() {
        let repo = Arc::new(InMemoryRepository::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let callback: ChangeCallback = Arc::new(move |changes| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(changes);
            })
        });

        let handle = subscribe_to_changes(repo.clone(), callback, Duration::from_millis(10));

        repo.put("a", json!(1)).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, ChangeKind::Inserted);

        repo.put("a", json!(2)).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second[0].kind, ChangeKind::Updated);

        repo.delete("a").await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(third[0].kind, ChangeKind::Removed);

        handle.unsubscribe().await;
    }
}
