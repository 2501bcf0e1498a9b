//! Graph JSON format (§6): `{tasks: TaskJSON[], dataflows: EdgeJSON[]}`, deserialised
//! against a registry mapping `type` strings to task factories.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compound::{CompoundMergeStrategy, CompoundTask};
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph};
use crate::schema::PortSchema;
use crate::task::Task;

/// One task node in the serialised graph (§6 `TaskJSON`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJson {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub defaults: Option<Value>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<PortSchema>,
    #[serde(default, rename = "outputSchema")]
    pub output_schema: Option<PortSchema>,
    #[serde(default)]
    pub extras: Option<Value>,
    /// Present only for compound/iterator task types; recursed into on
    /// deserialisation.
    #[serde(default)]
    pub subgraph: Option<GraphJson>,
    #[serde(default)]
    pub merge: Option<CompoundMergeStrategy>,
}

/// One dataflow edge in the serialised graph (§6 `EdgeJSON`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeJson {
    pub source_task_id: String,
    pub source_task_port_id: String,
    pub target_task_id: String,
    pub target_task_port_id: String,
}

/// The wire format of a whole graph, matching §6's `{tasks, dataflows}` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphJson {
    #[serde(default)]
    pub tasks: Vec<TaskJson>,
    #[serde(default)]
    pub dataflows: Vec<EdgeJson>,
}

/// Builds a concrete [`Task`] for a given `type` string and an optional `defaults`
/// payload the task's constructor should honour. Registered once at startup and
/// shared across every graph deserialised afterward.
pub type TaskFactory = Arc<dyn Fn(&Value) -> Result<Arc<dyn Task>> + Send + Sync>;

/// Maps `TaskJson.type` strings to [`TaskFactory`]s (§6 "A registry maps `type`
/// strings to task class factories").
#[derive(Default, Clone)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, factory: TaskFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    fn build(&self, type_name: &str, defaults: &Value) -> Result<Arc<dyn Task>> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| GraphError::Configuration(format!("no task factory registered for type '{type_name}'")))?;
        factory(defaults)
    }

    /// Deserialise `graph_json` into a runnable [`Graph`], recursing into any
    /// `subgraph` fields as [`CompoundTask`]s.
    pub fn build_graph(&self, graph_json: &GraphJson) -> Result<Graph> {
        let mut graph = Graph::new();
        for task_json in &graph_json.tasks {
            let task = self.build_task_node(task_json)?;
            graph.add_task(task_json.id.clone(), task)?;
        }
        for edge_json in &graph_json.dataflows {
            graph.add_edge(Edge {
                source_task_id: edge_json.source_task_id.clone(),
                source_port: edge_json.source_task_port_id.clone(),
                target_task_id: edge_json.target_task_id.clone(),
                target_port: edge_json.target_task_port_id.clone(),
            })?;
        }
        Ok(graph)
    }

    fn build_task_node(&self, task_json: &TaskJson) -> Result<Arc<dyn Task>> {
        if let Some(subgraph) = &task_json.subgraph {
            let inner = self.build_graph(subgraph)?;
            let merge = task_json.merge.unwrap_or_default();
            let mut compound = CompoundTask::new(task_json.type_name.clone(), inner, merge);
            if let (Some(input_schema), Some(output_schema)) = (&task_json.input_schema, &task_json.output_schema) {
                compound = compound.with_schemas(input_schema.clone(), output_schema.clone());
            }
            return Ok(Arc::new(compound));
        }
        let defaults = task_json.defaults.clone().unwrap_or(Value::Null);
        self.build(&task_json.type_name, &defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PortSchema;
    use crate::task::TaskContext;
    use async_trait::async_trait;
    use serde_json::json;

    struct Identity;

    #[async_trait]
    impl Task for Identity {
        fn type_name(&self) -> &str {
            "Identity"
        }
        fn input_schema(&self) -> &PortSchema {
            static S: std::sync::OnceLock<PortSchema> = std::sync::OnceLock::new();
            S.get_or_init(PortSchema::any)
        }
        fn output_schema(&self) -> &PortSchema {
            self.input_schema()
        }
        async fn execute(&self, input: Value, _ctx: &TaskContext) -> Result<Value> {
            Ok(input)
        }
    }

    fn test_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register("Identity", Arc::new(|_defaults: &Value| Ok(Arc::new(Identity) as Arc<dyn Task>)));
        registry
    }

    #[test]
    fn round_trip_serialisation_preserves_tasks_and_edges() {
        let graph_json = GraphJson {
            tasks: vec![
                TaskJson {
                    id: "a".into(),
                    type_name: "Identity".into(),
                    title: None,
                    defaults: None,
                    input_schema: None,
                    output_schema: None,
                    extras: None,
                    subgraph: None,
                    merge: None,
                },
                TaskJson {
                    id: "b".into(),
                    type_name: "Identity".into(),
                    title: None,
                    defaults: None,
                    input_schema: None,
                    output_schema: None,
                    extras: None,
                    subgraph: None,
                    merge: None,
                },
            ],
            dataflows: vec![EdgeJson {
                source_task_id: "a".into(),
                source_task_port_id: "out".into(),
                target_task_id: "b".into(),
                target_task_port_id: "in".into(),
            }],
        };

        let serialized = serde_json::to_value(&graph_json).unwrap();
        let deserialized: GraphJson = serde_json::from_value(serialized).unwrap();

        assert_eq!(deserialized.tasks.len(), 2);
        assert_eq!(deserialized.dataflows.len(), 1);
        assert_eq!(deserialized.dataflows[0].source_task_id, "a");
    }

    #[test]
    fn build_graph_instantiates_tasks_via_the_registry() {
        let registry = test_registry();
        let graph_json = GraphJson {
            tasks: vec![TaskJson {
                id: "a".into(),
                type_name: "Identity".into(),
                title: None,
                defaults: None,
                input_schema: None,
                output_schema: None,
                extras: None,
                subgraph: None,
                merge: None,
            }],
            dataflows: vec![],
        };
        let graph = registry.build_graph(&graph_json).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.task("a").unwrap().type_name(), "Identity");
    }

    #[test]
    fn unknown_type_is_a_configuration_error() {
        let registry = test_registry();
        let graph_json = GraphJson {
            tasks: vec![TaskJson {
                id: "a".into(),
                type_name: "Nonexistent".into(),
                title: None,
                defaults: None,
                input_schema: None,
                output_schema: None,
                extras: None,
                subgraph: None,
                merge: None,
            }],
            dataflows: vec![],
        };
        assert!(registry.build_graph(&graph_json).is_err());
    }

    #[test]
    fn subgraph_recurses_into_a_compound_task() {
        let registry = test_registry();
        let inner = GraphJson {
            tasks: vec![TaskJson {
                id: "inner_a".into(),
                type_name: "Identity".into(),
                title: None,
                defaults: None,
                input_schema: None,
                output_schema: None,
                extras: None,
                subgraph: None,
                merge: None,
            }],
            dataflows: vec![],
        };
        let graph_json = GraphJson {
            tasks: vec![TaskJson {
                id: "compound".into(),
                type_name: "Loop".into(),
                title: None,
                defaults: None,
                input_schema: None,
                output_schema: None,
                extras: None,
                subgraph: Some(inner),
                merge: Some(CompoundMergeStrategy::PropertyArray),
            }],
            dataflows: vec![],
        };
        let graph = registry.build_graph(&graph_json).unwrap();
        assert_eq!(graph.task("compound").unwrap().type_name(), "Loop");
        let _ = json!({});
    }
}
