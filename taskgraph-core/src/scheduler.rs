//! GraphScheduler — parallel wavefront execution over a [`Graph`] (§4.2, §5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::cancel::{root_token, CancelToken};
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::input::{add_input, forward_all_ports, ALL_PORTS};
use crate::registry::ServiceRegistry;
use crate::runner::{self, RunContext};
use crate::schema::{CompiledSchemaCache, PortSchema};
use crate::stream::{fan_out, StreamEvent, DEFAULT_TEE_BUFFER};
use crate::task::{OwnCallback, TaskId};
use taskgraph_store::TaskOutputCache;

/// Graph-level state machine (§4.2): `IDLE -> RUNNING -> {COMPLETED, FAILED, ABORTED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

/// The outcome of a full graph run: per-task outputs, and — on failure — the first
/// error plus the set of tasks that never reached a terminal state (§4.2 "Failure
/// policy").
pub struct GraphRunReport {
    pub status: GraphStatus,
    pub outputs: HashMap<TaskId, Value>,
    pub first_error: Option<GraphError>,
    pub incomplete_tasks: Vec<TaskId>,
}

/// How long a task may run after cancellation before the scheduler gives up waiting
/// and reports `HANG` (§5 "Timeouts").
pub const DEFAULT_CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Scheduler configuration.
pub struct SchedulerConfig {
    pub concurrency_cap: Option<usize>,
    pub cancel_grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: None,
            cancel_grace_period: DEFAULT_CANCEL_GRACE_PERIOD,
        }
    }
}

/// Drives one [`Graph`] through the parallel-wavefront execution model.
///
/// A fresh `GraphScheduler` is expected per run: re-running the same `Graph` means
/// constructing a new scheduler over it after resetting task inputs (§4.2
/// "Re-running requires resetting per-task runInputData to defaults").
pub struct GraphScheduler {
    services: Arc<ServiceRegistry>,
    schema_cache: Arc<CompiledSchemaCache>,
    cache: Option<Arc<dyn TaskOutputCache>>,
    config: SchedulerConfig,
    root_cancel: CancelToken,
}

impl GraphScheduler {
    pub fn new(services: Arc<ServiceRegistry>, cache: Option<Arc<dyn TaskOutputCache>>, config: SchedulerConfig) -> Self {
        Self {
            services,
            schema_cache: Arc::new(CompiledSchemaCache::new()),
            cache,
            config,
            root_cancel: root_token(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.root_cancel.clone()
    }

    /// Cancel the whole graph run. Non-blocking; in-flight tasks observe it at their
    /// next `await` point (§5 "Cancellation semantics").
    pub fn cancel(&self) {
        self.root_cancel.cancel();
    }

    /// Run `graph` to completion.
    pub async fn run(&self, graph: &Graph) -> GraphRunReport {
        info!(tasks = graph.len(), "graph run starting");
        let mut outputs: HashMap<TaskId, Value> = HashMap::new();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut failed = false;
        let mut first_error: Option<GraphError> = None;

        // Eager-edge live channels handed from a streaming producer into its eager
        // consumers' `input_streams`, keyed by (consumer task id, target port), and
        // the set of (consumer, port) pairs that have already received theirs —
        // readiness for an eager edge depends on this, not on producer completion.
        let mut pending_input_streams: HashMap<TaskId, HashMap<String, mpsc::Receiver<StreamEvent>>> = HashMap::new();
        let mut eager_delivered: HashMap<TaskId, HashSet<String>> = HashMap::new();
        // For a dispatched producer with eager consumers, where its live stream goes
        // once available: (consumer task id, target port) pairs.
        let mut eager_targets: HashMap<TaskId, Vec<(TaskId, String)>> = HashMap::new();

        let mut in_flight: Vec<(TaskId, tokio::task::JoinHandle<Result<Value>>)> = Vec::new();
        let mut pending_live: Vec<(TaskId, oneshot::Receiver<Option<mpsc::Receiver<StreamEvent>>>)> = Vec::new();

        loop {
            if self.root_cancel.is_cancelled() && in_flight.is_empty() {
                break;
            }

            let ready: Vec<TaskId> = graph
                .tasks()
                .map(|h| h.id().to_string())
                .filter(|id| !completed.contains(id))
                .filter(|id| in_flight.iter().all(|(running, _)| running != id))
                .filter(|id| {
                    graph
                        .edges_into(id)
                        .all(|e| source_satisfied(graph, &completed, &eager_delivered, id, e))
                })
                .collect();

            if ready.is_empty() && in_flight.is_empty() {
                break;
            }

            let cap = self.config.concurrency_cap.unwrap_or(usize::MAX);
            for task_id in ready {
                if in_flight.len() >= cap {
                    break;
                }
                if self.root_cancel.is_cancelled() {
                    break;
                }
                if failed {
                    break;
                }
                let Some(handle) = graph.task(&task_id) else { continue };

                let eager_consumers: Vec<(TaskId, String)> = graph
                    .edges_from(&task_id)
                    .filter(|edge| is_eager_edge(graph, edge))
                    .map(|e| (e.target_task_id.clone(), e.target_port.clone()))
                    .collect();
                let total_out_edges = graph.edges_from(&task_id).count();
                let should_accumulate = !(total_out_edges > 0
                    && eager_consumers.len() == total_out_edges
                    && !handle.task().cacheable());

                let input_streams = pending_input_streams.remove(&task_id).unwrap_or_default();
                let own: OwnCallback = Arc::new(|_id, _task| {
                    // Dynamically-attached child tasks (compound/iterator tasks) are
                    // wired into the owning CompoundTask's own sub-graph; a top-level
                    // scheduler run has no enclosing graph to attach into.
                });

                let run_ctx = RunContext {
                    services: self.services.clone(),
                    cancel: self.root_cancel.child_token(),
                    own,
                    input_streams,
                    should_accumulate,
                    cache: self.cache.clone(),
                    schema_cache: self.schema_cache.clone(),
                    eager_consumer_count: eager_consumers.len(),
                };

                let handle = handle.clone();
                let task_id_for_join = task_id.clone();
                let grace_period = self.config.cancel_grace_period;
                let root_cancel = self.root_cancel.clone();

                let live_tx = if !eager_consumers.is_empty() {
                    let (tx, rx) = oneshot::channel();
                    eager_targets.insert(task_id.clone(), eager_consumers);
                    pending_live.push((task_id.clone(), rx));
                    Some(tx)
                } else {
                    None
                };

                let join = tokio::spawn(async move {
                    let run_handle = match runner::run(handle.clone(), run_ctx).await {
                        Ok(rh) => rh,
                        Err(err) => {
                            if let Some(tx) = live_tx {
                                let _ = tx.send(None);
                            }
                            return Err(err);
                        }
                    };
                    if let Some(tx) = live_tx {
                        let _ = tx.send(run_handle.live_events);
                    }
                    match timeout(grace_period, run_handle.result).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(_)) => Err(GraphError::Failed {
                            task: handle.id().to_string(),
                            source: anyhow::anyhow!("task result channel dropped"),
                        }),
                        Err(_) => {
                            if root_cancel.is_cancelled() {
                                Err(GraphError::Hang { task: handle.id().to_string() })
                            } else {
                                Err(GraphError::Timeout {
                                    task: handle.id().to_string(),
                                    elapsed_ms: grace_period.as_millis() as u64,
                                })
                            }
                        }
                    }
                });
                in_flight.push((task_id_for_join, join));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                (producer_id, maybe_live) = await_one_live(&mut pending_live), if !pending_live.is_empty() => {
                    let targets = eager_targets.remove(&producer_id).unwrap_or_default();
                    match maybe_live {
                        Some(live) => {
                            let receivers = fan_out(live, targets.len(), DEFAULT_TEE_BUFFER);
                            for ((consumer_id, port), rx) in targets.into_iter().zip(receivers) {
                                pending_input_streams.entry(consumer_id.clone()).or_default().insert(port.clone(), rx);
                                eager_delivered.entry(consumer_id).or_default().insert(port);
                            }
                        }
                        None => {
                            for (consumer_id, port) in targets {
                                eager_delivered.entry(consumer_id).or_default().insert(port);
                            }
                        }
                    }
                }

                (finished_idx, task_id, result) = await_one(&mut in_flight) => {
                    in_flight.remove(finished_idx);
                    match result {
                        Ok(output) => {
                            outputs.insert(task_id.clone(), output.clone());
                            completed.insert(task_id.clone());
                            self.propagate(graph, &task_id, &output);
                        }
                        Err(err) => {
                            error!(task = %task_id, %err, "task failed, cancelling graph");
                            completed.insert(task_id.clone());
                            failed = true;
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                            self.cancel();
                        }
                    }
                }
            }
        }

        let incomplete: Vec<TaskId> = graph.tasks().map(|h| h.id().to_string()).filter(|id| !completed.contains(id)).collect();

        let status = if failed {
            GraphStatus::Failed
        } else if self.root_cancel.is_cancelled() {
            GraphStatus::Aborted
        } else if incomplete.is_empty() {
            GraphStatus::Completed
        } else {
            GraphStatus::Failed
        };

        info!(?status, completed = completed.len(), "graph run finished");
        GraphRunReport {
            status,
            outputs,
            first_error,
            incomplete_tasks: incomplete,
        }
    }

    /// Write a finished producer's output onto every *materialising* edge target's
    /// staging input (§4.2 "Input assembly", §4.3 `addInput`/`ALL_PORTS`). Eager
    /// edges already delivered their data via a live `inputStreams` channel and are
    /// skipped here.
    fn propagate(&self, graph: &Graph, source_id: &str, output: &Value) {
        for edge in graph.edges_from(source_id) {
            if is_eager_edge(graph, edge) {
                continue;
            }
            let Some(target) = graph.task(&edge.target_task_id) else { continue };
            let port_value = output.get(&edge.source_port).cloned().unwrap_or_else(|| output.clone());
            let schema = target.task().input_schema();

            let current = target.current_input();
            let updated = if schema.properties.contains_key(ALL_PORTS) && edge.target_port == ALL_PORTS {
                forward_all_ports(schema, &current, &port_value)
            } else {
                let port_schema = schema.properties.get(&edge.target_port);
                add_input(port_schema, &current, &edge.target_port, &port_value).0
            };
            target.set_input(updated);
        }
    }
}

/// A consumer task is ready once every incoming edge is satisfied: a materialising
/// edge needs its producer in `completed`; an eager edge needs its live stream
/// already delivered into `eager_delivered` (§4.2, §5 property 1: a materialising
/// input is never observed before the producer's terminal event — eager inputs are
/// explicitly exempt from that rule by definition).
fn source_satisfied(
    graph: &Graph,
    completed: &HashSet<TaskId>,
    eager_delivered: &HashMap<TaskId, HashSet<String>>,
    consumer_id: &str,
    edge: &crate::graph::Edge,
) -> bool {
    if is_eager_edge(graph, edge) {
        eager_delivered.get(consumer_id).map(|ports| ports.contains(&edge.target_port)).unwrap_or(false)
    } else {
        completed.contains(&edge.source_task_id)
    }
}

/// §4.2: "An edge from a producer with `x-stream: append` to a consumer whose
/// target port also has `x-stream: append` (or declares streaming-input tolerance)
/// starts the consumer eagerly."
fn is_eager_edge(graph: &Graph, edge: &crate::graph::Edge) -> bool {
    let Some(source) = graph.task(&edge.source_task_id) else { return false };
    let Some(target) = graph.task(&edge.target_task_id) else { return false };
    let producer_schema = source.task().output_schema();
    let consumer_schema = target.task().input_schema();
    let producer_streams = producer_schema
        .properties
        .get(&edge.source_port)
        .map(PortSchema::accepts_streaming_input)
        .unwrap_or(producer_schema.accepts_streaming_input());
    let consumer_accepts = consumer_schema
        .properties
        .get(&edge.target_port)
        .map(PortSchema::accepts_streaming_input)
        .unwrap_or(false);
    producer_streams && consumer_accepts
}

async fn await_one(
    in_flight: &mut [(TaskId, tokio::task::JoinHandle<Result<Value>>)],
) -> (usize, TaskId, Result<Value>) {
    use futures::future::select_all;
    let futures: Vec<_> = in_flight.iter_mut().map(|(_, handle)| handle).collect();
    let (outcome, idx, _remaining) = select_all(futures).await;
    let task_id = in_flight[idx].0.clone();
    let result = match outcome {
        Ok(result) => result,
        Err(join_err) => {
            warn!(%join_err, "task panicked");
            Err(GraphError::Failed {
                task: task_id.clone(),
                source: anyhow::anyhow!("task panicked: {join_err}"),
            })
        }
    };
    (idx, task_id, result)
}

/// Await whichever dispatched producer's live-stream handoff resolves first, and
/// remove it from `pending_live`.
async fn await_one_live(
    pending_live: &mut Vec<(TaskId, oneshot::Receiver<Option<mpsc::Receiver<StreamEvent>>>)>,
) -> (TaskId, Option<mpsc::Receiver<StreamEvent>>) {
    use futures::future::select_all;
    let futures: Vec<_> = pending_live.iter_mut().map(|(_, rx)| rx).collect();
    let (outcome, idx, _remaining) = select_all(futures).await;
    let (task_id, _) = pending_live.remove(idx);
    (task_id, outcome.unwrap_or(None))
}

/// Fan a completed or in-progress streaming producer's live events out to its eager
/// consumers' `inputStreams` maps. Exposed standalone (rather than inlined into
/// `run`) so a `CompoundTask`'s inner scheduler can reuse the same fan-out wiring
/// (§4.2 "Fan-out tees").
pub fn wire_eager_consumers(
    live_events: mpsc::Receiver<StreamEvent>,
    consumer_count: usize,
) -> Vec<mpsc::Receiver<StreamEvent>> {
    fan_out(live_events, consumer_count, DEFAULT_TEE_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PortSchema, SchemaType};
    use crate::task::{Task, TaskContext};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct AddOne;

    #[async_trait]
    impl Task for AddOne {
        fn type_name(&self) -> &str {
            "AddOne"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(|| PortSchema::object().with_property("value", PortSchema { schema_type: SchemaType::Number, ..PortSchema::default() }))
        }
        fn output_schema(&self) -> &PortSchema {
            self.input_schema()
        }
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
            let n = input.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(json!({"value": n + 1.0}))
        }
    }

    #[tokio::test]
    async fn pipe_of_two_scalar_tasks_runs_to_completion() {
        let mut graph = Graph::new();
        graph.add_task("a", Arc::new(AddOne)).unwrap();
        graph.add_task("b", Arc::new(AddOne)).unwrap();
        graph
            .add_edge(crate::graph::Edge {
                source_task_id: "a".into(),
                source_port: "value".into(),
                target_task_id: "b".into(),
                target_port: "value".into(),
            })
            .unwrap();
        graph.task("a").unwrap().set_input(json!({"value": 1.0}));

        let scheduler = GraphScheduler::new(Arc::new(ServiceRegistry::empty()), None, SchedulerConfig::default());
        let report = scheduler.run(&graph).await;

        assert_eq!(report.status, GraphStatus::Completed);
        assert_eq!(report.outputs["a"], json!({"value": 2.0}));
        assert_eq!(report.outputs["b"], json!({"value": 3.0}));
    }

    struct AlwaysFails;

    #[async_trait]
    impl Task for AlwaysFails {
        fn type_name(&self) -> &str {
            "AlwaysFails"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(PortSchema::any)
        }
        fn output_schema(&self) -> &PortSchema {
            self.input_schema()
        }
        async fn execute(&self, _input: Value, _ctx: &TaskContext) -> Result<Value> {
            Err(GraphError::Failed {
                task: "AlwaysFails".to_string(),
                source: anyhow::anyhow!("boom"),
            })
        }
    }

    struct StreamProducer;

    #[async_trait]
    impl Task for StreamProducer {
        fn type_name(&self) -> &str {
            "StreamProducer"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(PortSchema::any)
        }
        fn output_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(|| {
                PortSchema::object().with_property(
                    "text",
                    PortSchema {
                        schema_type: SchemaType::String,
                        stream_mode: crate::schema::StreamMode::Append,
                        ..PortSchema::default()
                    },
                )
            })
        }
        fn supports_streaming(&self) -> bool {
            true
        }
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
            Ok(input)
        }
        async fn execute_stream(&self, _input: Value, _ctx: &TaskContext) -> Result<crate::task::EventStream> {
            let events = vec![
                StreamEvent::TextDelta {
                    port: "text".into(),
                    text_delta: "hello".into(),
                },
                StreamEvent::TextDelta {
                    port: "text".into(),
                    text_delta: " world".into(),
                },
                StreamEvent::Finish { data: json!({}) },
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    struct EagerSink;

    #[async_trait]
    impl Task for EagerSink {
        fn type_name(&self) -> &str {
            "EagerSink"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(|| {
                PortSchema::object().with_property(
                    "text",
                    PortSchema {
                        schema_type: SchemaType::String,
                        stream_mode: crate::schema::StreamMode::Append,
                        ..PortSchema::default()
                    },
                )
            })
        }
        fn output_schema(&self) -> &PortSchema {
            self.input_schema()
        }
        async fn execute(&self, _input: Value, ctx: &TaskContext) -> Result<Value> {
            let mut rx = ctx.take_input_stream("text").expect("eager stream present");
            let mut collected = String::new();
            while let Some(event) = rx.recv().await {
                if let StreamEvent::TextDelta { text_delta, .. } = event {
                    collected.push_str(&text_delta);
                }
            }
            Ok(json!({"collected": collected}))
        }
    }

    struct MaterialSink;

    #[async_trait]
    impl Task for MaterialSink {
        fn type_name(&self) -> &str {
            "MaterialSink"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(|| PortSchema::object().with_property("final", PortSchema::string()))
        }
        fn output_schema(&self) -> &PortSchema {
            self.input_schema()
        }
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn fan_out_delivers_eager_stream_and_materialising_final_value() {
        let mut graph = Graph::new();
        graph.add_task("p", Arc::new(StreamProducer)).unwrap();
        graph.add_task("eager", Arc::new(EagerSink)).unwrap();
        graph.add_task("material", Arc::new(MaterialSink)).unwrap();
        graph
            .add_edge(crate::graph::Edge {
                source_task_id: "p".into(),
                source_port: "text".into(),
                target_task_id: "eager".into(),
                target_port: "text".into(),
            })
            .unwrap();
        graph
            .add_edge(crate::graph::Edge {
                source_task_id: "p".into(),
                source_port: "text".into(),
                target_task_id: "material".into(),
                target_port: "final".into(),
            })
            .unwrap();

        let scheduler = GraphScheduler::new(Arc::new(ServiceRegistry::empty()), None, SchedulerConfig::default());
        let report = scheduler.run(&graph).await;

        assert_eq!(report.status, GraphStatus::Completed);
        assert_eq!(report.outputs["eager"], json!({"collected": "hello world"}));
        assert_eq!(report.outputs["material"], json!({"final": "hello world"}));
    }

    #[tokio::test]
    async fn a_failing_task_cancels_the_graph() {
        let mut graph = Graph::new();
        graph.add_task("a", Arc::new(AlwaysFails)).unwrap();
        graph.add_task("b", Arc::new(AddOne)).unwrap();

        let scheduler = GraphScheduler::new(Arc::new(ServiceRegistry::empty()), None, SchedulerConfig::default());
        let report = scheduler.run(&graph).await;

        assert_eq!(report.status, GraphStatus::Failed);
        assert!(report.first_error.is_some());
    }
}
