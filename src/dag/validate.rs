// src/dag/validate.rs

//! Structural validation of a task graph before it is registered.

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::task::TaskSpec;
use crate::errors::{GendagError, Result};
use crate::types::TaskId;

/// Validate a set of task specs:
/// - ids are non-empty and unique,
/// - every dependency references a task in the same set,
/// - no task depends on itself,
/// - the graph is acyclic.
pub fn validate_task_specs(specs: &[TaskSpec]) -> Result<()> {
    ensure_unique_ids(specs)?;
    validate_task_dependencies(specs)?;
    topological_order(specs)?;
    Ok(())
}

fn ensure_unique_ids(specs: &[TaskSpec]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for spec in specs {
        if spec.id.trim().is_empty() {
            return Err(GendagError::InvalidPipeline(
                "task id must not be empty".to_string(),
            ));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(GendagError::InvalidPipeline(format!(
                "duplicate task id '{}'",
                spec.id
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(specs: &[TaskSpec]) -> Result<()> {
    let ids: HashSet<&str> = specs.iter().map(|s| s.id.as_str()).collect();
    for spec in specs {
        for dep in &spec.dependencies {
            if dep == &spec.id {
                return Err(GendagError::InvalidPipeline(format!(
                    "task '{}' cannot depend on itself",
                    spec.id
                )));
            }
            if !ids.contains(dep.as_str()) {
                return Err(GendagError::InvalidPipeline(format!(
                    "task '{}' has unknown dependency '{}'",
                    spec.id, dep
                )));
            }
        }
    }
    Ok(())
}

/// Task ids in a dependency-respecting order (dependencies first).
///
/// Edge direction: dep -> task. A task with `after = ["A"]` yields edge
/// `A -> task`.
pub fn topological_order(specs: &[TaskSpec]) -> Result<Vec<TaskId>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for spec in specs {
        graph.add_node(spec.id.as_str());
    }
    for spec in specs {
        for dep in &spec.dependencies {
            graph.add_edge(dep.as_str(), spec.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(GendagError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}
