//! S1 — pipe of scalars, exercised end to end through the crate's public API:
//! `Double(in -> out*2)`, `AddFive(in -> out+5)`, `Square(in -> out^2)` chained on a
//! single port. Run with `{value: 3}`, expect `{value: 121}`.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::json;

use taskgraph_core::{Edge, Graph, GraphScheduler, GraphStatus, SchedulerConfig, ServiceRegistry, Task, TaskContext};
use taskgraph_core::{PortSchema, SchemaType};

fn value_schema() -> &'static PortSchema {
    static S: OnceLock<PortSchema> = OnceLock::new();
    S.get_or_init(|| PortSchema::object().with_property("value", PortSchema { schema_type: SchemaType::Number, ..PortSchema::default() }))
}

struct Double;
struct AddFive;
struct Square;

macro_rules! scalar_task {
    ($name:ident, $op:expr) => {
        #[async_trait]
        impl Task for $name {
            fn type_name(&self) -> &str {
                stringify!($name)
            }
            fn input_schema(&self) -> &PortSchema {
                value_schema()
            }
            fn output_schema(&self) -> &PortSchema {
                value_schema()
            }
            async fn execute(&self, input: serde_json::Value, _ctx: &TaskContext) -> taskgraph_core::Result<serde_json::Value> {
                let n = input.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(json!({ "value": ($op)(n) }))
            }
        }
    };
}

scalar_task!(Double, |n: f64| n * 2.0);
scalar_task!(AddFive, |n: f64| n + 5.0);
scalar_task!(Square, |n: f64| n * n);

#[tokio::test]
async fn pipe_of_scalars_reaches_the_spec_s1_literal_output() {
    let mut graph = Graph::new();
    graph.add_task("double", Arc::new(Double)).unwrap();
    graph.add_task("add_five", Arc::new(AddFive)).unwrap();
    graph.add_task("square", Arc::new(Square)).unwrap();

    graph
        .add_edge(Edge {
            source_task_id: "double".into(),
            source_port: "value".into(),
            target_task_id: "add_five".into(),
            target_port: "value".into(),
        })
        .unwrap();
    graph
        .add_edge(Edge {
            source_task_id: "add_five".into(),
            source_port: "value".into(),
            target_task_id: "square".into(),
            target_port: "value".into(),
        })
        .unwrap();

    graph.task("double").unwrap().set_input(json!({"value": 3.0}));

    let scheduler = GraphScheduler::new(Arc::new(ServiceRegistry::empty()), None, SchedulerConfig::default());
    let report = scheduler.run(&graph).await;

    assert_eq!(report.status, GraphStatus::Completed);
    assert_eq!(report.outputs["square"], json!({"value": 121.0}));
}
