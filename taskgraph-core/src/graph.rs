//! Dataflow graph: tasks plus directed edges between their ports (§3, §4.2).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::task::{Task, TaskHandle, TaskId};

/// One directed dataflow edge, from a producer task's output port to a consumer
/// task's input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source_task_id: TaskId,
    pub source_port: String,
    pub target_task_id: TaskId,
    pub target_port: String,
}

/// A directed acyclic graph of [`TaskHandle`]s connected by [`Edge`]s.
///
/// `Graph` itself holds no execution state beyond the tasks' own [`TaskHandle`]
/// state; running it is [`crate::scheduler::GraphScheduler`]'s job. Keeping the two
/// separate means a single `Graph` can be driven by a fresh scheduler on every
/// re-run, matching §4.2's "re-running requires resetting per-task `runInputData`".
#[derive(Default)]
pub struct Graph {
    tasks: HashMap<TaskId, Arc<TaskHandle>>,
    edges: Vec<Edge>,
    insertion_order: Vec<TaskId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `id`, wrapping it in a fresh [`TaskHandle`]. Errors if
    /// `id` is already taken (§6 "duplicate ID" is a configuration error).
    pub fn add_task(&mut self, id: impl Into<TaskId>, task: Arc<dyn Task>) -> Result<()> {
        let id = id.into();
        if self.tasks.contains_key(&id) {
            return Err(GraphError::Configuration(format!("duplicate task id '{id}'")));
        }
        self.insertion_order.push(id.clone());
        self.tasks.insert(id.clone(), Arc::new(TaskHandle::new(id, task)));
        Ok(())
    }

    /// Connect `source_task_id`'s `source_port` output to `target_task_id`'s
    /// `target_port` input. Errors on a dangling endpoint, or if the edge would close
    /// a cycle (§6: edges "may not create a cycle").
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if !self.tasks.contains_key(&edge.source_task_id) {
            return Err(GraphError::Configuration(format!("dangling edge source '{}'", edge.source_task_id)));
        }
        if !self.tasks.contains_key(&edge.target_task_id) {
            return Err(GraphError::Configuration(format!("dangling edge target '{}'", edge.target_task_id)));
        }
        self.edges.push(edge.clone());
        if self.topological_order().is_err() {
            self.edges.pop();
            return Err(GraphError::Configuration(format!(
                "edge '{}:{}' -> '{}:{}' would create a cycle",
                edge.source_task_id, edge.source_port, edge.target_task_id, edge.target_port
            )));
        }
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&Arc<TaskHandle>> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskHandle>> {
        self.insertion_order.iter().filter_map(move |id| self.tasks.get(id))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_into(&self, task_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target_task_id == task_id)
    }

    pub fn edges_from(&self, task_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source_task_id == task_id)
    }

    /// Tasks with no outgoing edges — the graph's sinks, whose outputs feed a
    /// [`crate::compound::CompoundMergeStrategy`] (§4.2).
    pub fn sinks(&self) -> Vec<TaskId> {
        self.insertion_order
            .iter()
            .filter(|id| self.edges_from(id).next().is_none())
            .cloned()
            .collect()
    }

    /// Producers of `task_id`'s sources, by unique task id.
    pub fn sources_of(&self, task_id: &str) -> HashSet<TaskId> {
        self.edges_into(task_id).map(|e| e.source_task_id.clone()).collect()
    }

    /// Kahn's-algorithm topological order over task ids. Errors with
    /// [`GraphError::Configuration`] if the graph contains a cycle (§6 malformed
    /// graph).
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = self.insertion_order.iter().map(|id| (id.clone(), 0)).collect();
        for edge in &self.edges {
            *in_degree.get_mut(&edge.target_task_id).unwrap() += 1;
        }
        let mut queue: VecDeque<TaskId> =
            self.insertion_order.iter().filter(|id| in_degree[*id] == 0).cloned().collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for edge in self.edges_from(&id) {
                let degree = in_degree.get_mut(&edge.target_task_id).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(edge.target_task_id.clone());
                }
            }
        }
        if order.len() != self.tasks.len() {
            return Err(GraphError::Configuration("graph contains a cycle".to_string()));
        }
        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
