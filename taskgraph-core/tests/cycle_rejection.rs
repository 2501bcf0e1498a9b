//! A graph whose edges would close a cycle must be rejected at construction time
//! (§6 "edges may not create a cycle"), not discovered later as a silent `Failed`
//! run with no indication of why nothing was ready to dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use taskgraph_core::{Edge, Graph, GraphError, PortSchema, Task, TaskContext};

struct Pass;

#[async_trait]
impl Task for Pass {
    fn type_name(&self) -> &str {
        "Pass"
    }
    fn input_schema(&self) -> &PortSchema {
        static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
        S.get_or_init(PortSchema::any)
    }
    fn output_schema(&self) -> &PortSchema {
        self.input_schema()
    }
    async fn execute(&self, input: Value, _ctx: &TaskContext) -> taskgraph_core::Result<Value> {
        Ok(input)
    }
}

#[test]
fn a_three_cycle_is_rejected_with_a_configuration_error_not_a_silent_failed_run() {
    let mut graph = Graph::new();
    graph.add_task("a", Arc::new(Pass)).unwrap();
    graph.add_task("b", Arc::new(Pass)).unwrap();
    graph.add_task("c", Arc::new(Pass)).unwrap();

    graph
        .add_edge(Edge {
            source_task_id: "a".into(),
            source_port: "out".into(),
            target_task_id: "b".into(),
            target_port: "in".into(),
        })
        .unwrap();
    graph
        .add_edge(Edge {
            source_task_id: "b".into(),
            source_port: "out".into(),
            target_task_id: "c".into(),
            target_port: "in".into(),
        })
        .unwrap();

    // c -> a closes the cycle; this must be rejected right here, not left for the
    // scheduler to discover as an empty-ready-set `Failed` run.
    let result = graph.add_edge(Edge {
        source_task_id: "c".into(),
        source_port: "out".into(),
        target_task_id: "a".into(),
        target_port: "in".into(),
    });

    match result {
        Err(GraphError::Configuration(reason)) => {
            assert!(reason.contains("cycle"), "expected a cycle-specific reason, got: {reason}");
        }
        other => panic!("expected a Configuration error naming the cycle, got {other:?}"),
    }

    // the graph is left exactly as it was before the rejected edge.
    assert_eq!(graph.edges().len(), 2);
    assert_eq!(graph.topological_order().unwrap(), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
}
