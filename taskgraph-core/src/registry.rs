//! Process-wide service registry.
//!
//! Built at startup and frozen before the first graph runs (§9 "Global mutable
//! state"). Long-lived services — model repositories, output caches, worker pools —
//! are registered by strongly-typed token (Rust's `TypeId`) and resolved by tasks via
//! [`crate::task::TaskContext::services`]. Opaque handles (the "Model IDs" of §9
//! "Resolved handles") are a separate, smaller table keyed by string token; resolving
//! one never serializes the live object back into a task's JSON input/output.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{GraphError, Result};

type AnyService = Arc<dyn Any + Send + Sync>;

/// Builder for a [`ServiceRegistry`]. Consumed by [`ServiceRegistryBuilder::freeze`].
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    services: HashMap<TypeId, AnyService>,
    handles: HashMap<String, AnyService>,
}

impl ServiceRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a long-lived service, keyed by its concrete type.
    pub fn with_service<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.services.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Pre-populate an opaque handle (e.g. a loaded model) under `token`.
    pub fn with_handle<T: Any + Send + Sync>(mut self, token: impl Into<String>, value: T) -> Self {
        self.handles.insert(token.into(), Arc::new(value));
        self
    }

    pub fn freeze(self) -> ServiceRegistry {
        ServiceRegistry {
            services: self.services,
            handles: RwLock::new(self.handles),
            frozen: AtomicBool::new(true),
        }
    }
}

/// A frozen, process-wide registry of services and resolvable handles.
///
/// Services are fixed at freeze time — there is no API to add a new service type
/// afterward, matching §9's "mutation after freeze is a configuration error" for the
/// service table itself. The handle table is intentionally more dynamic (new model
/// handles can appear as graphs load them at runtime); mutating it always succeeds.
pub struct ServiceRegistry {
    services: HashMap<TypeId, AnyService>,
    handles: RwLock<HashMap<String, AnyService>>,
    frozen: AtomicBool,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new()
    }

    pub fn empty() -> Self {
        ServiceRegistryBuilder::new().freeze()
    }

    /// Resolve a registered service by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get(&TypeId::of::<T>()).and_then(|svc| svc.clone().downcast::<T>().ok())
    }

    /// Register (or replace) an opaque handle under `token`. Errors only if the
    /// registry has somehow been torn down; in practice this never fails because
    /// the handle table itself is not subject to the freeze invariant.
    pub fn register_handle<T: Any + Send + Sync>(&self, token: impl Into<String>, value: T) -> Result<()> {
        if !self.frozen.load(Ordering::SeqCst) {
            return Err(GraphError::Configuration(
                "service registry mutated before freeze".to_string(),
            ));
        }
        self.handles.write().unwrap().insert(token.into(), Arc::new(value));
        Ok(())
    }

    /// Resolve an opaque handle by token, downcasting to `T`.
    pub fn resolve_handle<T: Any + Send + Sync>(&self, token: &str) -> Option<Arc<T>> {
        self.handles.read().unwrap().get(token)?.clone().downcast::<T>().ok()
    }

    /// `true` if a handle exists for `token`, regardless of its concrete type.
    pub fn has_handle(&self, token: &str) -> bool {
        self.handles.read().unwrap().contains_key(token)
    }
}
