// src/engine/core.rs

//! Pure per-tick scheduling logic.
//!
//! Everything here is synchronous and operates on a borrowed
//! [`PipelineStore`]: no Tokio types, no channels, no executors. The async
//! shell ([`crate::engine::scheduler::Scheduler`]) locks the store, calls
//! [`plan_tick`] / [`apply_completion`] and performs the IO the returned
//! outcome asks for.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::{Pipeline, PipelineStore, Task};
use crate::output::MediaOutput;
use crate::types::{PipelineId, PipelineStatus, TaskId, TaskStatus};

/// A task marked `running` by a tick, ready to be handed to an executor.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    pub pipeline_id: PipelineId,
    /// Snapshot taken after the task was marked `running`.
    pub task: Task,
    /// Snapshots of the task's direct dependencies, keyed by id.
    pub dependencies: HashMap<TaskId, Task>,
}

/// What one tick decided.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing to do: no active pipeline, it is paused, or nothing is
    /// runnable while work is still in flight.
    Idle,
    /// The active pipeline reached a terminal status and the active pointer
    /// was cleared.
    Finished {
        pipeline_id: PipelineId,
        status: PipelineStatus,
    },
    /// These tasks were marked `running` and must be executed.
    Dispatched {
        pipeline_id: PipelineId,
        tasks: Vec<DispatchedTask>,
    },
}

/// Result of one execution, as reported back to the engine.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub pipeline_id: PipelineId,
    pub task_id: TaskId,
    /// Output on success; the rendered error chain on failure.
    pub result: Result<MediaOutput, String>,
}

/// How a completion was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    /// Put back to `pending`; `attempt` is the new `retry_count`.
    Retrying { attempt: u32, error: String },
    /// Terminal failure; `skipped` lists dependents pruned by the cascade.
    Failed { error: String, skipped: Vec<TaskId> },
    /// The task was no longer `running` (cancelled or removed meanwhile).
    Ignored,
}

/// Run one scheduling tick against the active pipeline.
pub fn plan_tick(store: &mut PipelineStore) -> TickOutcome {
    let Some(pipeline) = store.active_pipeline() else {
        return TickOutcome::Idle;
    };
    if pipeline.status != PipelineStatus::Active {
        debug!(pipeline_id = %pipeline.id, status = %pipeline.status, "active pipeline not dispatchable");
        return TickOutcome::Idle;
    }

    let pipeline_id = pipeline.id.clone();

    if pipeline.all_terminal() {
        let status = if pipeline.any_with_status(TaskStatus::Cancelled) {
            PipelineStatus::Cancelled
        } else {
            PipelineStatus::Completed
        };
        return finish(store, pipeline_id, status);
    }

    let runnable = pipeline.runnable_task_ids();

    if is_stuck(pipeline, &runnable) {
        let status = if pipeline.any_with_status(TaskStatus::Failed) {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Cancelled
        };
        warn!(
            pipeline_id = %pipeline_id,
            pending = pipeline.count(TaskStatus::Pending),
            failed = pipeline.count(TaskStatus::Failed),
            cancelled = pipeline.count(TaskStatus::Cancelled),
            "pipeline stuck: nothing running and nothing runnable"
        );
        return finish(store, pipeline_id, status);
    }

    if runnable.is_empty() {
        return TickOutcome::Idle;
    }

    // Mark everything running before any executor sees it, so a slow
    // execution can never be picked up again by a later tick.
    for task_id in &runnable {
        store.update_task_status(&pipeline_id, task_id, TaskStatus::Running, None, None);
    }

    let Some(pipeline) = store.pipeline(&pipeline_id) else {
        return TickOutcome::Idle;
    };
    let tasks: Vec<DispatchedTask> = runnable
        .iter()
        .filter_map(|id| pipeline.task(id))
        .map(|task| DispatchedTask {
            pipeline_id: pipeline_id.clone(),
            task: task.clone(),
            dependencies: pipeline.dependency_snapshot(task),
        })
        .collect();

    debug!(
        pipeline_id = %pipeline_id,
        tasks = ?runnable,
        "dispatching runnable tasks"
    );
    TickOutcome::Dispatched { pipeline_id, tasks }
}

/// Terminal `failed`/`cancelled` tasks exist, nothing is running, and nothing
/// pending can ever become runnable.
fn is_stuck(pipeline: &Pipeline, runnable: &[TaskId]) -> bool {
    let has_blocking = pipeline.any_with_status(TaskStatus::Failed)
        || pipeline.any_with_status(TaskStatus::Cancelled);
    has_blocking && !pipeline.any_with_status(TaskStatus::Running) && runnable.is_empty()
}

fn finish(store: &mut PipelineStore, pipeline_id: PipelineId, status: PipelineStatus) -> TickOutcome {
    store.update_pipeline_status(&pipeline_id, status);
    if store.active_pipeline_id() == Some(pipeline_id.as_str()) {
        store.set_active_pipeline(None);
    }
    info!(pipeline_id = %pipeline_id, %status, "pipeline finished");
    TickOutcome::Finished {
        pipeline_id,
        status,
    }
}

/// Record the result of one execution.
///
/// Failures are retried while `retry_count < max_retries`, otherwise the
/// task fails terminally and its pending dependents are skipped.
pub fn apply_completion(store: &mut PipelineStore, completion: TaskCompletion) -> CompletionOutcome {
    let TaskCompletion {
        pipeline_id,
        task_id,
        result,
    } = completion;

    let Some(task) = store.task(&pipeline_id, &task_id) else {
        debug!(pipeline_id = %pipeline_id, task = %task_id, "completion for unknown task; discarding");
        return CompletionOutcome::Ignored;
    };
    if task.status != TaskStatus::Running {
        info!(
            pipeline_id = %pipeline_id,
            task = %task_id,
            status = %task.status,
            "completion for task that is no longer running; discarding result"
        );
        return CompletionOutcome::Ignored;
    }
    let can_retry = task.can_retry();

    match result {
        Ok(output) => {
            store.update_task_status(
                &pipeline_id,
                &task_id,
                TaskStatus::Completed,
                Some(output),
                None,
            );
            info!(pipeline_id = %pipeline_id, task = %task_id, "task completed");
            CompletionOutcome::Completed
        }
        Err(error) if can_retry => {
            store.retry_task(&pipeline_id, &task_id, error.clone());
            let attempt = store
                .task(&pipeline_id, &task_id)
                .map(|t| t.retry_count)
                .unwrap_or_default();
            warn!(
                pipeline_id = %pipeline_id,
                task = %task_id,
                attempt,
                error = %error,
                "task failed; scheduling retry"
            );
            CompletionOutcome::Retrying { attempt, error }
        }
        Err(error) => {
            let skipped = store.update_task_status(
                &pipeline_id,
                &task_id,
                TaskStatus::Failed,
                None,
                Some(error.clone()),
            );
            warn!(
                pipeline_id = %pipeline_id,
                task = %task_id,
                error = %error,
                skipped = skipped.len(),
                "task failed; retries exhausted"
            );
            CompletionOutcome::Failed { error, skipped }
        }
    }
}
