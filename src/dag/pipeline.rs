// src/dag/pipeline.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::dag::graph::DagGraph;
use crate::dag::task::{Task, TaskSpec};
use crate::types::{PipelineId, PipelineStatus, TaskId, TaskStatus};

/// A named DAG of tasks plus its own lifecycle status.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    tasks: HashMap<TaskId, Task>,
    /// Insertion order; dispatch and iteration follow it.
    order: Vec<TaskId>,
    graph: DagGraph,
}

/// Per-status task counts of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub id: PipelineId,
    pub name: String,
    pub status: PipelineStatus,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl Pipeline {
    /// Build a pipeline from already-validated specs.
    pub(crate) fn new(
        id: PipelineId,
        name: String,
        specs: Vec<TaskSpec>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut pipeline = Self {
            id,
            name,
            status: PipelineStatus::Active,
            created_at: now,
            updated_at: now,
            tasks: HashMap::with_capacity(specs.len()),
            order: Vec::with_capacity(specs.len()),
            graph: DagGraph::default(),
        };
        for spec in specs {
            pipeline.insert_task(spec, now);
        }
        pipeline
    }

    pub(crate) fn insert_task(&mut self, spec: TaskSpec, now: DateTime<Utc>) {
        let task = Task::from_spec(spec, now);
        self.graph.add_node(&task.id, &task.dependencies);
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        self.updated_at = now;
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub(crate) fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    /// Runnable iff pending and every dependency is completed or skipped.
    pub fn is_runnable(&self, task: &Task) -> bool {
        if task.status != TaskStatus::Pending {
            return false;
        }
        task.dependencies.iter().all(|dep_id| match self.tasks.get(dep_id) {
            Some(dep) => dep.status.satisfies_dependents(),
            None => {
                warn!(
                    pipeline_id = %self.id,
                    task = %task.id,
                    dep = %dep_id,
                    "dependency missing from pipeline"
                );
                false
            }
        })
    }

    /// Ids of all currently runnable tasks, in insertion order.
    pub fn runnable_task_ids(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| self.is_runnable(t))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Every task is completed, skipped or cancelled.
    ///
    /// `failed` is deliberately not part of this set: pipelines with failures
    /// are finalized by stuck detection instead.
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| {
            matches!(
                t.status,
                TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Cancelled
            )
        })
    }

    pub fn any_with_status(&self, status: TaskStatus) -> bool {
        self.tasks.values().any(|t| t.status == status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Snapshot of the direct dependencies of `task`, keyed by id.
    pub fn dependency_snapshot(&self, task: &Task) -> HashMap<TaskId, Task> {
        task.dependencies
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| (id.clone(), t.clone())))
            .collect()
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            total: self.tasks.len(),
            pending: self.count(TaskStatus::Pending),
            running: self.count(TaskStatus::Running),
            completed: self.count(TaskStatus::Completed),
            failed: self.count(TaskStatus::Failed),
            skipped: self.count(TaskStatus::Skipped),
            cancelled: self.count(TaskStatus::Cancelled),
        }
    }

    /// Mark every pending task that transitively depends on `root` as
    /// `Skipped`. Returns the ids that changed.
    ///
    /// Non-pending dependents keep their status but are still traversed, so
    /// the whole unreachable subtree is covered.
    pub(crate) fn skip_pending_dependents(
        &mut self,
        root: &str,
        now: DateTime<Utc>,
    ) -> Vec<TaskId> {
        let mut skipped = Vec::new();

        for id in self.graph.transitive_dependents(root) {
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.status == TaskStatus::Pending {
                    task.status = TaskStatus::Skipped;
                    task.updated_at = now;
                    debug!(
                        pipeline_id = %self.id,
                        task = %task.id,
                        upstream = %root,
                        "skipping task blocked by upstream failure"
                    );
                    skipped.push(id);
                }
            }
        }

        if !skipped.is_empty() {
            self.updated_at = now;
        }
        skipped
    }
}
