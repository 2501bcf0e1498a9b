//! `taskgraph-core` — the task-graph execution engine: task lifecycle, streaming
//! runner, wavefront scheduler, and dataflow/input model.
//!
//! Modules mirror the spec's own section breakdown rather than a generic
//! "models/services" split, so a reader moving between `spec.md` and the source
//! tree lands in the same place: [`task`] is the lifecycle (§2), [`runner`] is
//! single-task execution (§4.1), [`scheduler`] is the graph-level wavefront (§4.2),
//! [`input`] is the dataflow merge semantics (§4.3), [`json`] is the wire format
//! (§6), and [`compound`] is nested graphs as tasks (§4.2/§9).

pub mod cancel;
pub mod compound;
pub mod error;
pub mod events;
pub mod graph;
pub mod input;
pub mod json;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod schema;
pub mod stream;
pub mod task;

pub use cancel::{root_token, CancelToken};
pub use compound::{merge_sink_outputs, CompoundMergeStrategy, CompoundTask};
pub use error::{GraphError, Result};
pub use events::{EventBus, EventListener, TaskEvent};
pub use graph::{Edge, Graph};
pub use json::{EdgeJson, GraphJson, TaskFactory, TaskJson, TaskRegistry};
pub use registry::{ServiceRegistry, ServiceRegistryBuilder};
pub use runner::{RunContext, RunHandle};
pub use scheduler::{GraphRunReport, GraphScheduler, GraphStatus, SchedulerConfig};
pub use schema::{CompiledSchemaCache, PortSchema, SchemaType, SemanticFormat, StreamMode};
pub use stream::{fan_out, tee, StreamEvent, DEFAULT_TEE_BUFFER};
pub use task::{ProgressReporter, Task, TaskContext, TaskHandle, TaskId, TaskStateSnapshot, TaskStatus, TaskTiming};
