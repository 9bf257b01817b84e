// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::types::TaskId;

/// Internal node structure: the direct dependents of a task.
#[derive(Debug, Clone, Default)]
struct DagNode {
    dependents: Vec<TaskId>,
}

/// In-memory adjacency for one pipeline's task graph.
///
/// Acyclicity is checked in [`crate::dag::validate`] before a graph is built;
/// here we only keep adjacency information for scheduling and cascades.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<TaskId, DagNode>,
}

impl DagGraph {
    /// Add a node; dependencies that are not in the graph yet get a
    /// placeholder node so later inserts keep the dependents list complete.
    pub fn add_node(&mut self, id: &TaskId, deps: &[TaskId]) {
        self.nodes.entry(id.clone()).or_default();
        for dep in deps {
            let node = self.nodes.entry(dep.clone()).or_default();
            if !node.dependents.contains(id) {
                node.dependents.push(id.clone());
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Return all task ids.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every task that transitively depends on `root`, in discovery order.
    /// `root` itself is not included.
    pub fn transitive_dependents(&self, root: &str) -> Vec<TaskId> {
        let mut stack: Vec<&TaskId> = self.dependents_of(root).iter().rev().collect();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut out = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.as_str()) {
                continue;
            }
            out.push(id.clone());
            stack.extend(self.dependents_of(id).iter().rev());
        }

        out
    }
}
