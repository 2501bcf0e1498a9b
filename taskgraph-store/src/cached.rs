//! Cached repository: a volatile front composed with a durable back.
//!
//! Writes go to the durable repository first, then the cache, so a crash between the
//! two leaves the durable copy authoritative. Reads check the cache first and lazily
//! populate it from the durable repository on a miss.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::repository::{Repository, SearchQuery};

/// Composes a volatile `front` (typically [`crate::memory::InMemoryRepository`]) with a
/// durable `back` (any [`Repository`] implementation with real persistence).
pub struct CachedRepository<F, D> {
    front: F,
    back: D,
}

impl<F, D> CachedRepository<F, D>
where
    F: Repository,
    D: Repository,
{
    pub fn new(front: F, back: D) -> Self {
        Self { front, back }
    }
}

#[async_trait]
impl<F, D> Repository for CachedRepository<F, D>
where
    F: Repository,
    D: Repository,
{
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.back.put(key, value.clone()).await?;
        self.front.put(key, value).await?;
        Ok(())
    }

    async fn put_bulk(&self, items: Vec<(String, Value)>) -> Result<()> {
        self.back.put_bulk(items.clone()).await?;
        self.front.put_bulk(items).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.front.get(key).await? {
            return Ok(Some(value));
        }
        match self.back.get(key).await? {
            Some(value) => {
                if let Err(err) = self.front.put(key, value.clone()).await {
                    warn!(%key, %err, "cache populate failed after durable read");
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<(String, Value)>> {
        // Search always goes to the durable source of truth: the cache may hold a
        // strict subset of rows, so searching it alone would under-report matches.
        self.back.search(query).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.back.delete(key).await?;
        self.front.delete(key).await?;
        Ok(existed)
    }

    async fn delete_search(&self, query: &SearchQuery) -> Result<usize> {
        let matches = self.back.search(query).await?;
        let mut deleted = 0;
        for (key, _) in matches {
            if self.back.delete(&key).await? {
                deleted += 1;
            }
            self.front.delete(&key).await?;
        }
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<usize> {
        let deleted = self.back.delete_all().await?;
        self.front.delete_all().await?;
        Ok(deleted)
    }

    async fn get_all(&self) -> Result<Vec<(String, Value)>> {
        self.back.get_all().await
    }

    async fn size(&self) -> Result<usize> {
        self.back.size().await
    }
}
