//! CompoundTask — a [`Graph`] executed as a single [`Task`] (§4.2 "Compound merge",
//! §9 "Dynamic dispatch & inheritance": `Task -> CompoundTask -> specific tasks`).

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::graph::Graph;
use crate::registry::ServiceRegistry;
use crate::schema::PortSchema;
use crate::scheduler::{GraphScheduler, GraphStatus, SchedulerConfig};
use crate::task::{Task, TaskContext};

/// How a compound task's inner graph's sink outputs combine into the compound
/// task's single output value (§4.2). `PropertyArray` is the only strategy this
/// engine exercises end-to-end (§9 Open Question 2); the others are identified by
/// tag for forward compatibility with a future sub-spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompoundMergeStrategy {
    /// For each port name emitted by any sink, collect values in topological sink
    /// order; a port produced by exactly one sink unwraps to the scalar.
    #[default]
    PropertyArray,
    /// The last sink (in topological order) to emit a given port wins.
    LastWins,
    /// Sink outputs are kept as a map keyed by sink task id, no port-level merge.
    NamedTable,
}

/// Merge the outputs of `sinks` (in topological order) per `strategy`.
pub fn merge_sink_outputs(strategy: CompoundMergeStrategy, sinks: &[(String, Value)]) -> Value {
    match strategy {
        CompoundMergeStrategy::PropertyArray => {
            let mut by_port: Vec<(String, Vec<Value>)> = Vec::new();
            for (_, output) in sinks {
                let Value::Object(obj) = output else { continue };
                for (port, value) in obj {
                    match by_port.iter_mut().find(|(p, _)| p == port) {
                        Some((_, values)) => values.push(value.clone()),
                        None => by_port.push((port.clone(), vec![value.clone()])),
                    }
                }
            }
            let mut merged = Map::new();
            for (port, mut values) in by_port {
                let value = if values.len() == 1 { values.pop().unwrap() } else { Value::Array(values) };
                merged.insert(port, value);
            }
            Value::Object(merged)
        }
        CompoundMergeStrategy::LastWins => {
            let mut merged = Map::new();
            for (_, output) in sinks {
                if let Value::Object(obj) = output {
                    for (port, value) in obj {
                        merged.insert(port.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        CompoundMergeStrategy::NamedTable => {
            let mut table = Map::new();
            for (sink_id, output) in sinks {
                table.insert(sink_id.clone(), output.clone());
            }
            Value::Object(table)
        }
    }
}

/// A [`Task`] whose execution runs an inner [`Graph`] to completion and merges its
/// sink outputs. The inner graph's cancellation token is a child of the compound
/// task's own context token (§4.2 "A child graph inherits a derived token that also
/// cancels if the parent task is aborted").
pub struct CompoundTask {
    type_name: String,
    input_schema: PortSchema,
    output_schema: PortSchema,
    merge_strategy: CompoundMergeStrategy,
    graph: RwLock<Graph>,
}

impl CompoundTask {
    pub fn new(type_name: impl Into<String>, graph: Graph, merge_strategy: CompoundMergeStrategy) -> Self {
        Self {
            type_name: type_name.into(),
            input_schema: PortSchema::any(),
            output_schema: PortSchema::any(),
            merge_strategy,
            graph: RwLock::new(graph),
        }
    }

    pub fn with_schemas(mut self, input_schema: PortSchema, output_schema: PortSchema) -> Self {
        self.input_schema = input_schema;
        self.output_schema = output_schema;
        self
    }
}

#[async_trait]
impl Task for CompoundTask {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn input_schema(&self) -> &PortSchema {
        &self.input_schema
    }

    fn output_schema(&self) -> &PortSchema {
        &self.output_schema
    }

    async fn execute(&self, input: Value, ctx: &TaskContext) -> Result<Value> {
        debug!(task = %self.type_name, "running compound task's inner graph");

        // Every sourceless task in the inner graph receives the compound task's own
        // resolved input via `setInput` (§4.3): known ports are merged in, unknown
        // keys dropped unless the task's schema allows `additionalProperties`.
        {
            let graph = self.graph.read().unwrap();
            for task in graph.tasks() {
                if graph.sources_of(task.id()).is_empty() {
                    let merged = crate::input::set_input(task.task().input_schema(), &task.current_input(), &input);
                    task.set_input(merged);
                }
            }
        }

        let services = ctx.services.clone();
        let scheduler = GraphScheduler::new(services, None, SchedulerConfig::default());
        let child_cancel = ctx.cancel.child_token();
        let graph = self.graph.read().unwrap();

        let report = tokio::select! {
            biased;
            _ = child_cancel.cancelled() => {
                scheduler.cancel();
                scheduler.run(&graph).await
            }
            report = scheduler.run(&graph) => report,
        };

        match report.status {
            GraphStatus::Completed => {
                let sinks: Vec<(String, Value)> = graph
                    .sinks()
                    .into_iter()
                    .filter_map(|id| report.outputs.get(&id).cloned().map(|out| (id, out)))
                    .collect();
                Ok(merge_sink_outputs(self.merge_strategy, &sinks))
            }
            GraphStatus::Aborted => Err(crate::error::GraphError::Aborted(format!(
                "compound task {} aborted: incomplete {:?}",
                self.type_name, report.incomplete_tasks
            ))),
            _ => Err(report.first_error.unwrap_or_else(|| crate::error::GraphError::Failed {
                task: self.type_name.clone(),
                source: anyhow::anyhow!("compound task's inner graph failed with incomplete tasks {:?}", report.incomplete_tasks),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PortSchema, SchemaType};
    use crate::task::TaskContext;
    use serde_json::json;

    struct Double;

    #[async_trait]
    impl Task for Double {
        fn type_name(&self) -> &str {
            "Double"
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
            Ok(json!({"result": n * 2.0}))
        }
    }

    struct Square;

    #[async_trait]
    impl Task for Square {
        fn type_name(&self) -> &str {
            "Square"
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
            Ok(json!({"squared": n * n}))
        }
    }

    #[test]
    fn property_array_unwraps_single_producer_ports_to_scalars() {
        let sinks = vec![
            ("double".to_string(), json!({"result": 8})),
            ("square".to_string(), json!({"squared": 16})),
        ];
        let merged = merge_sink_outputs(CompoundMergeStrategy::PropertyArray, &sinks);
        assert_eq!(merged, json!({"result": 8, "squared": 16}));
    }

    #[test]
    fn property_array_collects_multiple_producers_of_the_same_port() {
        let sinks = vec![
            ("a".to_string(), json!({"result": 1})),
            ("b".to_string(), json!({"result": 2})),
        ];
        let merged = merge_sink_outputs(CompoundMergeStrategy::PropertyArray, &sinks);
        assert_eq!(merged, json!({"result": [1, 2]}));
    }

    #[tokio::test]
    async fn compound_task_runs_inner_graph_and_merges_parallel_sinks() {
        // S2 — Parallel property-array merge.
        let mut graph = Graph::new();
        graph.add_task("double", Arc::new(Double)).unwrap();
        graph.add_task("square", Arc::new(Square)).unwrap();

        let compound = CompoundTask::new("ParallelOps", graph, CompoundMergeStrategy::PropertyArray);
        let ctx = TaskContext {
            cancel: crate::cancel::root_token(),
            services: Arc::new(ServiceRegistry::empty()),
            own: Arc::new(|_, _| {}),
            progress: Arc::new(crate::task::ProgressReporter::new(
                "compound".to_string(),
                Arc::new(crate::events::EventBus::new()),
                std::time::Duration::from_millis(200),
            )),
            input_streams: RwLock::new(Default::default()),
        };

        let output = compound.execute(json!({"value": 4.0}), &ctx).await.unwrap();
        assert_eq!(output, json!({"result": 8.0, "squared": 16.0}));
    }
}
