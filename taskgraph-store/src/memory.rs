//! In-memory [`Repository`] implementation for testing and development.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::repository::{Repository, SearchQuery};

/// A `RwLock<HashMap<..>>`-backed repository. No persistence across process restarts.
#[derive(Default)]
pub struct InMemoryRepository {
    data: RwLock<HashMap<String, Value>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().unwrap();
        Ok(data.get(key).cloned())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<(String, Value)>> {
        let data = self.data.read().unwrap();
        Ok(data
            .iter()
            .filter(|(_, v)| query.matches(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().unwrap();
        Ok(data.remove(key).is_some())
    }

    async fn delete_all(&self) -> Result<usize> {
        let mut data = self.data.write().unwrap();
        let count = data.len();
        data.clear();
        Ok(count)
    }

    async fn get_all(&self) -> Result<Vec<(String, Value)>> {
        let data = self.data.read().unwrap();
        Ok(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn size(&self) -> Result<usize> {
        let data = self.data.read().unwrap();
        Ok(data.len())
    }
}
