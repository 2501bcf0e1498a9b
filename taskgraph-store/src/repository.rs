//! Abstract key/value repository with schema-agnostic search.
//!
//! `Repository` is the one persistence contract the task-graph core is allowed to
//! depend on (see `spec.md` §6). Concrete backends — filesystem-per-row, SQL, NoSQL —
//! live outside this crate; `taskgraph-store` ships only [`crate::memory::InMemoryRepository`]
//! and the [`crate::cached::CachedRepository`] composition wrapper as reference
//! implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::error::Result;

/// Comparison operator for a [`SearchCriterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
}

/// One clause of a search predicate: `field op value`.
#[derive(Debug, Clone)]
pub struct SearchCriterion {
    pub field: String,
    pub op: SearchOp,
    pub value: Value,
}

impl SearchCriterion {
    pub fn new(field: impl Into<String>, op: SearchOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this criterion against a stored value. Fields are resolved as a
    /// dotted path into the JSON document (`"a.b.c"`); a missing field never matches.
    pub fn matches(&self, doc: &Value) -> bool {
        let Some(field_value) = resolve_path(doc, &self.field) else {
            return false;
        };
        match self.op {
            SearchOp::Eq => field_value == &self.value,
            SearchOp::Ne => field_value != &self.value,
            SearchOp::Lt => compare_numeric(field_value, &self.value).map(|o| o.is_lt()).unwrap_or(false),
            SearchOp::Le => compare_numeric(field_value, &self.value).map(|o| o.is_le()).unwrap_or(false),
            SearchOp::Gt => compare_numeric(field_value, &self.value).map(|o| o.is_gt()).unwrap_or(false),
            SearchOp::Ge => compare_numeric(field_value, &self.value).map(|o| o.is_ge()).unwrap_or(false),
            SearchOp::In => self
                .value
                .as_array()
                .map(|arr| arr.contains(field_value))
                .unwrap_or(false),
            SearchOp::Contains => field_value
                .as_array()
                .map(|arr| arr.contains(&self.value))
                .unwrap_or(false),
        }
    }
}

fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn compare_numeric(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let (a, b) = (a.as_f64()?, b.as_f64()?);
    a.partial_cmp(&b)
}

/// A conjunction (`AND`) of [`SearchCriterion`]s. An empty query matches everything.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery(pub Vec<SearchCriterion>);

impl SearchQuery {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn and(mut self, criterion: SearchCriterion) -> Self {
        self.0.push(criterion);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.0.iter().all(|c| c.matches(doc))
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchQuery({} criteria)", self.0.len())
    }
}

/// Schema-agnostic key/value repository.
///
/// Implementations must serialize concurrent reads and writes against a single key
/// (spec.md §5 treats repositories as opaque linearizable services).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Write many rows. Not required to be atomic across keys, only per-key.
    async fn put_bulk(&self, items: Vec<(String, Value)>) -> Result<()> {
        for (key, value) in items {
            self.put(&key, value).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<(String, Value)>>;

    /// Returns `true` if the key existed and was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every row matching `query`; returns the number deleted.
    async fn delete_search(&self, query: &SearchQuery) -> Result<usize> {
        let matches = self.search(query).await?;
        let mut deleted = 0;
        for (key, _) in matches {
            if self.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_all(&self) -> Result<usize>;

    async fn get_all(&self) -> Result<Vec<(String, Value)>>;

    async fn size(&self) -> Result<usize>;
}
