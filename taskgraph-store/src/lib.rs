//! # taskgraph-store — repository and task-output cache abstractions
//!
//! This crate holds the one persistence contract the task-graph execution engine
//! (`taskgraph-core`) is allowed to depend on: a schema-agnostic key/value
//! [`Repository`] with conjunctive search predicates, a poll-based change
//! subscription helper, and a `(taskType, fingerprint(input))`-keyed
//! [`TaskOutputCache`].
//!
//! Everything here is backend-agnostic. The only concrete implementations shipped
//! are [`InMemoryRepository`] / [`InMemoryTaskOutputCache`] (for tests and small
//! deployments) and [`CachedRepository`], which composes a volatile front with any
//! durable back. Real backends — SQL, NoSQL, filesystem-per-row — are external
//! collaborators that implement [`Repository`] directly.

pub mod cache;
pub mod cached;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod repository;
pub mod subscription;

pub use cache::{CacheEntry, InMemoryTaskOutputCache, TaskOutputCache};
pub use cached::CachedRepository;
pub use error::{Result, StoreError};
pub use fingerprint::fingerprint;
pub use memory::InMemoryRepository;
pub use repository::{Repository, SearchCriterion, SearchOp, SearchQuery};
pub use subscription::{subscribe_to_changes, Change, ChangeCallback, ChangeKind, SubscriptionHandle};
