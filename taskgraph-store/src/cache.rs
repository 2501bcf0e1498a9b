//! `TaskOutput` cache — keyed by `(taskType, fingerprint(input))`.
//!
//! This is the cache the task runner consults in `spec.md` §4.1 step 4. Hits return
//! the cached output and the runner replays it as a synthetic `finish` event so the
//! stream-event contract (§3) is preserved even though nothing actually streamed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;
use crate::fingerprint::fingerprint;

/// A single cached task output.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub task_type: String,
    pub fingerprint: String,
    pub output: Value,
    pub created_at: DateTime<Utc>,
}

/// Key/value cache for task outputs, keyed by `(task_type, fingerprint(input))`.
///
/// Implementations are expected to store values compressed and to validate the
/// decompressed shape before returning it — a corrupt blob is treated the same as a
/// cache miss, never as an error (spec.md §4.1: "Cache read failure → log, treat as
/// miss").
#[async_trait]
pub trait TaskOutputCache: Send + Sync {
    async fn get(&self, task_type: &str, input: &Value) -> Option<Value>;
    async fn put(&self, task_type: &str, input: &Value, output: Value) -> Result<()>;
    /// Purge entries older than `max_age`; returns the number removed.
    async fn clear_older_than(&self, max_age: Duration) -> Result<usize>;
}

struct StoredEntry {
    compressed: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// In-process `TaskOutputCache` backed by gzip-compressed JSON blobs.
#[derive(Default)]
pub struct InMemoryTaskOutputCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl InMemoryTaskOutputCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(task_type: &str, input: &Value) -> String {
        fingerprint(task_type, input)
    }

    fn compress(output: &Value) -> std::io::Result<Vec<u8>> {
        let bytes = serde_json::to_vec(output)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()
    }

    fn decompress(compressed: &[u8]) -> std::io::Result<Value> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder.write_all(compressed)?;
        let bytes = decoder.finish()?;
        serde_json::from_slice(&bytes).map_err(std::io::Error::other)
    }
}

#[async_trait]
impl TaskOutputCache for InMemoryTaskOutputCache {
    async fn get(&self, task_type: &str, input: &Value) -> Option<Value> {
        let key = Self::key(task_type, input);
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&key)?;
        match Self::decompress(&entry.compressed) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%key, %err, "task output cache blob failed to decode, treating as miss");
                None
            }
        }
    }

    async fn put(&self, task_type: &str, input: &Value, output: Value) -> Result<()> {
        let key = Self::key(task_type, input);
        match Self::compress(&output) {
            Ok(compressed) => {
                let mut entries = self.entries.write().unwrap();
                entries.insert(
                    key,
                    StoredEntry {
                        compressed,
                        created_at: Utc::now(),
                    },
                );
                Ok(())
            }
            Err(err) => {
                // Spec: "Cache write failure -> log, surface success" — the caller
                // already has the computed output, so this is non-fatal here too.
                warn!(%key, %err, "task output cache write failed");
                Ok(())
            }
        }
    }

    async fn clear_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - entries.len())
    }
}
