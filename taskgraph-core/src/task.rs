//! Task identity, status state machine, and the `Task` contract (`spec.md` §3, §4.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::{GraphError, Result};
use crate::events::{EventBus, TaskEvent};
use crate::registry::ServiceRegistry;
use crate::schema::PortSchema;
use crate::stream::StreamEvent;

pub type TaskId = String;

/// A task's status. Only the task's own runner may mutate it (§3). Terminal states
/// are [`TaskStatus::Completed`], [`TaskStatus::Failed`], and [`TaskStatus::Disabled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Streaming,
    Completed,
    Failed,
    Aborting,
    Disabled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Disabled)
    }

    /// `PENDING → PROCESSING → {COMPLETED, FAILED, ABORTING→FAILED}`;
    /// `PROCESSING → STREAMING → COMPLETED`; `PENDING → DISABLED` (§3).
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Disabled)
                | (Processing, Streaming)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Aborting)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Aborting)
                | (Aborting, Failed)
        )
    }
}

/// Created/started/completed timestamps for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTiming {
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A read-only copy of a task's current state, safe to hand to callers outside the
/// runner.
#[derive(Debug, Clone)]
pub struct TaskStateSnapshot {
    pub status: TaskStatus,
    pub progress: u8,
    pub timing: TaskTiming,
    pub input: Value,
    pub output: Option<Value>,
    pub last_error: Option<String>,
}

struct TaskState {
    status: TaskStatus,
    progress: u8,
    timing: TaskTiming,
    input: Value,
    output: Option<Value>,
    last_error: Option<String>,
}

/// The stateful wrapper the graph and scheduler hold for each task instance.
///
/// `TaskHandle` owns the mutable [`TaskState`]; every mutating method is
/// `pub(crate)` so only [`crate::scheduler::GraphScheduler`] and
/// [`crate::runner::TaskRunner`] (both in this crate) can drive status transitions,
/// matching "only the task's own runner may mutate it".
pub struct TaskHandle {
    id: TaskId,
    type_name: String,
    task: Arc<dyn Task>,
    state: RwLock<TaskState>,
    pub events: Arc<EventBus>,
}

impl TaskHandle {
    pub fn new(id: impl Into<TaskId>, task: Arc<dyn Task>) -> Self {
        let type_name = task.type_name().to_string();
        let default_input = task.default_input();
        Self {
            id: id.into(),
            type_name,
            task,
            state: RwLock::new(TaskState {
                status: TaskStatus::Pending,
                progress: 0,
                timing: TaskTiming {
                    created_at: Some(Utc::now()),
                    ..Default::default()
                },
                input: default_input,
                output: None,
                last_error: None,
            }),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn snapshot(&self) -> TaskStateSnapshot {
        let state = self.state.read().unwrap();
        TaskStateSnapshot {
            status: state.status,
            progress: state.progress,
            timing: state.timing.clone(),
            input: state.input.clone(),
            output: state.output.clone(),
            last_error: state.last_error.clone(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.read().unwrap().status
    }

    pub fn current_input(&self) -> Value {
        self.state.read().unwrap().input.clone()
    }

    pub(crate) fn set_input(&self, input: Value) {
        self.state.write().unwrap().input = input;
    }

    pub(crate) fn set_output(&self, output: Value) {
        self.state.write().unwrap().output = Some(output);
    }

    pub(crate) fn set_error(&self, err: String) {
        self.state.write().unwrap().last_error = Some(err);
    }

    /// Transition to `to`. Returns a [`GraphError::Configuration`] if the transition
    /// is not one of the §3 state machine's allowed edges.
    pub(crate) fn set_status(&self, to: TaskStatus) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            if !state.status.can_transition_to(to) {
                return Err(GraphError::Configuration(format!(
                    "task {}: illegal transition {:?} -> {:?}",
                    self.id, state.status, to
                )));
            }
            match to {
                TaskStatus::Processing if state.timing.started_at.is_none() => {
                    state.timing.started_at = Some(Utc::now());
                }
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Disabled => {
                    state.timing.completed_at = Some(Utc::now());
                }
                _ => {}
            }
            state.status = to;
        }
        self.events.emit(TaskEvent::Status(to));
        Ok(())
    }

    pub(crate) fn set_progress(&self, pct: u8, message: Option<String>) {
        {
            let mut state = self.state.write().unwrap();
            state.progress = pct.min(100);
        }
        self.events.emit(TaskEvent::Progress { pct, message });
    }
}

/// Attaches a dynamically created child task to the graph a compound/iterator task
/// is building (§4.1 `ctx.own()`).
pub type OwnCallback = Arc<dyn Fn(TaskId, Arc<dyn Task>) + Send + Sync>;

/// Rate-limited progress reporter handed to tasks via [`TaskContext`]. Progress
/// updates faster than `min_interval` apart are dropped except for the final 100%
/// report, so a tight loop of `ctx.progress()` calls cannot thunder-herd listeners
/// (§4.1 "Progress").
pub struct ProgressReporter {
    handle_id: TaskId,
    events: Arc<EventBus>,
    min_interval_ms: u64,
    last_emit_ms: AtomicU64,
    epoch: std::time::Instant,
}

impl ProgressReporter {
    pub(crate) fn new(handle_id: TaskId, events: Arc<EventBus>, min_interval: Duration) -> Self {
        Self {
            handle_id,
            events,
            min_interval_ms: min_interval.as_millis() as u64,
            last_emit_ms: AtomicU64::new(0),
            epoch: std::time::Instant::now(),
        }
    }

    pub fn report(&self, pct: u8, message: Option<String>) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_emit_ms.load(Ordering::Relaxed);
        if pct < 100 && now_ms.saturating_sub(last) < self.min_interval_ms {
            return;
        }
        self.last_emit_ms.store(now_ms, Ordering::Relaxed);
        let _ = &self.handle_id;
        self.events.emit(TaskEvent::Progress { pct, message });
    }
}

/// Context passed to every `Task` method invocation (§4.1).
pub struct TaskContext {
    pub cancel: CancelToken,
    pub services: Arc<ServiceRegistry>,
    pub own: OwnCallback,
    pub progress: Arc<ProgressReporter>,
    /// Live upstream streams for a consumer that is itself streaming-downstream of a
    /// streaming producer (§4.2 eager edges). Keyed by the target port id.
    pub input_streams: RwLock<HashMap<String, mpsc::Receiver<StreamEvent>>>,
}

impl TaskContext {
    pub fn take_input_stream(&self, port: &str) -> Option<mpsc::Receiver<StreamEvent>> {
        self.input_streams.write().unwrap().remove(port)
    }
}

/// A boxed stream of [`StreamEvent`]s, as returned by [`Task::execute_stream`].
pub type EventStream = Pin<Box<dyn futures::Stream<Item = StreamEvent> + Send>>;

/// The contract every task implements (§4.1, §9 "Dynamic dispatch & inheritance").
///
/// Only [`Task::execute`] is required. Streaming tasks also implement
/// [`Task::execute_stream`] and advertise it via [`Task::supports_streaming`];
/// [`Task::execute_reactive`] is a separate, optional, side-effect-free hook for UI
/// live previews (§4.1).
#[async_trait]
pub trait Task: Send + Sync {
    fn type_name(&self) -> &str;

    fn input_schema(&self) -> &PortSchema;

    fn output_schema(&self) -> &PortSchema;

    /// If `true`, the runner consults and populates a [`taskgraph_store::TaskOutputCache`].
    fn cacheable(&self) -> bool {
        false
    }

    /// If `true`, this task's schemas depend on its configuration and must be
    /// recompiled on `schemaChange` (§9 "Schema validation").
    fn has_dynamic_schemas(&self) -> bool {
        false
    }

    fn default_input(&self) -> Value {
        Value::Object(Default::default())
    }

    /// `true` if any output port declares `x-stream: append` (or the task otherwise
    /// has a real `execute_stream` implementation). Drives the runner's dispatch
    /// decision in §4.1 step 5.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Non-streaming execution path.
    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value>;

    /// Streaming execution path. The default implementation is never called by the
    /// runner when [`Task::supports_streaming`] is `false`.
    async fn execute_stream(&self, input: Value, ctx: &TaskContext) -> Result<EventStream> {
        let _ = (input, ctx);
        Err(GraphError::Configuration(format!(
            "{} does not implement execute_stream",
            self.type_name()
        )))
    }

    /// Lightweight, idempotent, side-effect-free recomputation for live previews.
    /// The default simply returns the previous output unchanged.
    async fn execute_reactive(&self, input: Value, prev_output: Option<&Value>, ctx: &TaskContext) -> Result<Value> {
        let _ = (input, ctx);
        Ok(prev_output.cloned().unwrap_or(Value::Null))
    }
}
