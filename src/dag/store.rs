// src/dag/store.rs

//! Authoritative store of pipelines and the single active-pipeline pointer.
//!
//! All task/pipeline state changes go through the transition methods here.
//! Mutations that name an unknown pipeline or task are a logged no-op: the
//! engine reads and writes through separate lock acquisitions, so a pipeline
//! being removed in between is an expected race, not a bug.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::pipeline::{Pipeline, PipelineSummary};
use crate::dag::task::{Task, TaskSpec};
use crate::dag::validate::validate_task_specs;
use crate::errors::{GendagError, Result};
use crate::output::MediaOutput;
use crate::types::{PipelineId, PipelineStatus, TaskId, TaskStatus};

/// Store handle shared between the scheduler loop, executors' completion
/// path and external operators (pause/cancel).
pub type SharedStore = Arc<Mutex<PipelineStore>>;

#[derive(Debug, Default)]
pub struct PipelineStore {
    pipelines: HashMap<PipelineId, Pipeline>,
    active: Option<PipelineId>,
}

impl PipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh store in a [`SharedStore`].
    pub fn shared() -> SharedStore {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Validate and register a pipeline. It starts `active` but dormant until
    /// [`set_active_pipeline`](Self::set_active_pipeline) points at it.
    pub fn create_pipeline(
        &mut self,
        name: impl Into<String>,
        specs: Vec<TaskSpec>,
    ) -> Result<PipelineId> {
        validate_task_specs(&specs)?;

        let id = Uuid::new_v4().to_string();
        let name = name.into();
        let pipeline = Pipeline::new(id.clone(), name.clone(), specs, Utc::now());

        info!(
            pipeline_id = %id,
            name = %name,
            tasks = pipeline.len(),
            "pipeline created"
        );
        self.pipelines.insert(id.clone(), pipeline);
        Ok(id)
    }

    /// Add one task to an existing pipeline. Its dependencies must already
    /// exist; since nothing can depend on the new task yet, no cycle can form.
    pub fn add_task(&mut self, pipeline_id: &str, spec: TaskSpec) -> Result<()> {
        let pipeline = self
            .pipelines
            .get_mut(pipeline_id)
            .ok_or_else(|| GendagError::PipelineNotFound(pipeline_id.to_string()))?;

        if spec.id.trim().is_empty() {
            return Err(GendagError::InvalidPipeline(
                "task id must not be empty".to_string(),
            ));
        }
        if pipeline.contains_task(&spec.id) {
            return Err(GendagError::InvalidPipeline(format!(
                "duplicate task id '{}'",
                spec.id
            )));
        }
        if let Some(dep) = spec
            .dependencies
            .iter()
            .find(|d| !pipeline.contains_task(d))
        {
            return Err(GendagError::InvalidPipeline(format!(
                "task '{}' has unknown dependency '{}'",
                spec.id, dep
            )));
        }

        debug!(pipeline_id, task = %spec.id, "task added to pipeline");
        pipeline.insert_task(spec, Utc::now());
        Ok(())
    }

    pub fn pipeline(&self, id: &str) -> Option<&Pipeline> {
        self.pipelines.get(id)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    pub fn task(&self, pipeline_id: &str, task_id: &str) -> Option<&Task> {
        self.pipelines.get(pipeline_id)?.task(task_id)
    }

    pub fn summary(&self, pipeline_id: &str) -> Option<PipelineSummary> {
        self.pipelines.get(pipeline_id).map(Pipeline::summary)
    }

    pub fn runnable_tasks(&self, pipeline_id: &str) -> Vec<TaskId> {
        self.pipelines
            .get(pipeline_id)
            .map(Pipeline::runnable_task_ids)
            .unwrap_or_default()
    }

    pub fn active_pipeline_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_pipeline(&self) -> Option<&Pipeline> {
        self.active.as_deref().and_then(|id| self.pipelines.get(id))
    }

    /// Point the scheduler at `id` (or at nothing).
    pub fn set_active_pipeline(&mut self, id: Option<&str>) {
        match id {
            Some(id) if !self.pipelines.contains_key(id) => {
                warn!(pipeline_id = %id, "set_active_pipeline: unknown pipeline; ignoring");
            }
            Some(id) => {
                debug!(pipeline_id = %id, "active pipeline set");
                self.active = Some(id.to_string());
            }
            None => {
                debug!("active pipeline cleared");
                self.active = None;
            }
        }
    }

    pub fn update_pipeline_status(&mut self, pipeline_id: &str, status: PipelineStatus) {
        let Some(pipeline) = self.pipelines.get_mut(pipeline_id) else {
            warn!(pipeline_id, %status, "update_pipeline_status: unknown pipeline; ignoring");
            return;
        };
        if pipeline.status != status {
            info!(
                pipeline_id,
                from = %pipeline.status,
                to = %status,
                "pipeline status changed"
            );
        }
        pipeline.status = status;
        pipeline.updated_at = Utc::now();
    }

    /// Set a task's status, merging `output` and recording `error` when given.
    ///
    /// Entering `Failed` or `Cancelled` runs the skip cascade. Returns the ids
    /// of tasks skipped by the cascade.
    pub fn update_task_status(
        &mut self,
        pipeline_id: &str,
        task_id: &str,
        status: TaskStatus,
        output: Option<MediaOutput>,
        error: Option<String>,
    ) -> Vec<TaskId> {
        let Some(pipeline) = self.pipelines.get_mut(pipeline_id) else {
            warn!(pipeline_id, task = %task_id, %status, "update_task_status: unknown pipeline; ignoring");
            return Vec::new();
        };
        let now = Utc::now();
        let Some(task) = pipeline.task_mut(task_id) else {
            warn!(pipeline_id, task = %task_id, %status, "update_task_status: unknown task; ignoring");
            return Vec::new();
        };

        debug!(
            pipeline_id,
            task = %task_id,
            from = %task.status,
            to = %status,
            "task status changed"
        );
        task.status = status;
        task.updated_at = now;
        if let Some(output) = output {
            match task.output.as_mut() {
                Some(existing) => existing.merge(output),
                None => task.output = Some(output),
            }
        }
        if error.is_some() {
            task.error = error;
        }
        pipeline.updated_at = now;

        if status.is_blocking_terminal() {
            let skipped = pipeline.skip_pending_dependents(task_id, now);
            if !skipped.is_empty() {
                info!(
                    pipeline_id,
                    task = %task_id,
                    skipped = skipped.len(),
                    "skip cascade pruned unreachable dependents"
                );
            }
            skipped
        } else {
            Vec::new()
        }
    }

    /// Record a failed attempt and put the task back into the runnable pool.
    ///
    /// Only valid while `retry_count < max_retries`; otherwise this is a
    /// logged no-op and the caller should mark the task failed instead.
    /// Returns `true` if the task was reset to `Pending`.
    pub fn retry_task(&mut self, pipeline_id: &str, task_id: &str, error: impl Into<String>) -> bool {
        let Some(pipeline) = self.pipelines.get_mut(pipeline_id) else {
            warn!(pipeline_id, task = %task_id, "retry_task: unknown pipeline; ignoring");
            return false;
        };
        let now = Utc::now();
        let Some(task) = pipeline.task_mut(task_id) else {
            warn!(pipeline_id, task = %task_id, "retry_task: unknown task; ignoring");
            return false;
        };
        if !task.can_retry() {
            warn!(
                pipeline_id,
                task = %task_id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                "retry_task: retries exhausted; ignoring"
            );
            return false;
        }

        task.retry_count += 1;
        task.error = Some(error.into());
        task.status = TaskStatus::Pending;
        task.updated_at = now;
        pipeline.updated_at = now;
        true
    }

    /// Stop dispatching new tasks of this pipeline. In-flight executions keep
    /// running and their results are still recorded.
    pub fn pause_pipeline(&mut self, pipeline_id: &str) {
        match self.pipelines.get(pipeline_id).map(|p| p.status) {
            Some(PipelineStatus::Active) => {
                self.update_pipeline_status(pipeline_id, PipelineStatus::Paused)
            }
            Some(other) => {
                warn!(pipeline_id, status = %other, "pause_pipeline: pipeline not active; ignoring")
            }
            None => warn!(pipeline_id, "pause_pipeline: unknown pipeline; ignoring"),
        }
    }

    pub fn resume_pipeline(&mut self, pipeline_id: &str) {
        match self.pipelines.get(pipeline_id).map(|p| p.status) {
            Some(PipelineStatus::Paused) => {
                self.update_pipeline_status(pipeline_id, PipelineStatus::Active)
            }
            Some(other) => {
                warn!(pipeline_id, status = %other, "resume_pipeline: pipeline not paused; ignoring")
            }
            None => warn!(pipeline_id, "resume_pipeline: unknown pipeline; ignoring"),
        }
    }

    /// Cancel one task. An in-flight execution is not interrupted; its later
    /// result is discarded. Pending dependents are skipped.
    pub fn cancel_task(&mut self, pipeline_id: &str, task_id: &str) -> Vec<TaskId> {
        match self.task(pipeline_id, task_id).map(|t| t.status) {
            Some(TaskStatus::Pending | TaskStatus::Running) => self.update_task_status(
                pipeline_id,
                task_id,
                TaskStatus::Cancelled,
                None,
                None,
            ),
            Some(other) => {
                warn!(pipeline_id, task = %task_id, status = %other, "cancel_task: task already finished; ignoring");
                Vec::new()
            }
            None => {
                warn!(pipeline_id, task = %task_id, "cancel_task: unknown task; ignoring");
                Vec::new()
            }
        }
    }

    /// Cancel every unfinished task, mark the pipeline `Cancelled` and clear
    /// the active pointer if it pointed here.
    pub fn cancel_pipeline(&mut self, pipeline_id: &str) {
        let Some(pipeline) = self.pipelines.get_mut(pipeline_id) else {
            warn!(pipeline_id, "cancel_pipeline: unknown pipeline; ignoring");
            return;
        };
        let now = Utc::now();
        let unfinished: Vec<TaskId> = pipeline
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
            .map(|t| t.id.clone())
            .collect();
        for id in &unfinished {
            if let Some(task) = pipeline.task_mut(id) {
                task.status = TaskStatus::Cancelled;
                task.updated_at = now;
            }
        }
        info!(pipeline_id, cancelled = unfinished.len(), "pipeline cancelled");

        self.update_pipeline_status(pipeline_id, PipelineStatus::Cancelled);
        if self.active.as_deref() == Some(pipeline_id) {
            self.active = None;
        }
    }

    /// Drop a pipeline. Clears the active pointer if it pointed here.
    pub fn remove_pipeline(&mut self, pipeline_id: &str) -> Option<Pipeline> {
        if self.active.as_deref() == Some(pipeline_id) {
            self.active = None;
        }
        self.pipelines.remove(pipeline_id)
    }
}
