//! Per-task event bus.
//!
//! Listener topics match `spec.md` §6: `start`, `status`, `progress`, `stream_start`,
//! `stream_chunk`, `stream_end`, `complete`, `error`, `abort`, `disabled`,
//! `schemaChange`. Listeners on a given task receive events in dispatch order (§5);
//! listeners on different tasks have no ordering guarantee relative to each other.

use serde_json::Value;
use std::sync::{Arc, RwLock};

use crate::stream::StreamEvent;
use crate::task::TaskStatus;

/// One event emitted on a task's bus.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Start,
    Status(TaskStatus),
    Progress { pct: u8, message: Option<String> },
    StreamStart,
    StreamChunk(StreamEvent),
    StreamEnd,
    Complete(Value),
    Error(String),
    Abort,
    Disabled,
    SchemaChange,
}

/// An event bus listener. Registered listeners are invoked synchronously and in
/// registration order every time [`EventBus::emit`] is called.
pub type EventListener = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Per-task event bus. One instance per [`crate::task::TaskHandle`].
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<EventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: EventListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Dispatch `event` to every listener, in registration order.
    pub fn emit(&self, event: TaskEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_see_dispatch_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe(Arc::new(move |event: &TaskEvent| {
            let label = match event {
                TaskEvent::Start => "start",
                TaskEvent::Complete(_) => "complete",
                _ => "other",
            };
            seen_clone.lock().unwrap().push(label.to_string());
        }));
        bus.emit(TaskEvent::Start);
        bus.emit(TaskEvent::Complete(Value::Null));
        assert_eq!(*seen.lock().unwrap(), vec!["start", "complete"]);
    }
}
