// src/exec/mod.rs

//! Task execution layer.
//!
//! The engine talks to an [`ExecutorBackend`]; the production implementation
//! is [`GenerationExecutor`], which dispatches on the task payload:
//!
//! - [`keyframe`], [`video`], [`upscale`] and [`interpolate`] submit work to
//!   the generation backend through the shared [`GenerationQueue`].
//! - [`export`] and [`generic`] run directly.
//! - [`frames`] holds the last-frame extraction strategies used by
//!   [`video`] for frame chaining.

pub mod export;
pub mod frames;
pub mod generic;
pub mod interpolate;
pub mod keyframe;
pub mod upscale;
pub mod video;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::backend::GenerationBackend;
use crate::dag::{Task, TaskPayload};
use crate::output::MediaOutput;
use crate::progress::{LogProgressSink, ProgressSink};
use crate::queue::{GenerationJob, GenerationQueue};
use crate::settings::SettingsProvider;
use crate::types::{BoxFuture, PipelineId, TaskId, TaskStatus};

pub use frames::{FetchingFrameExtractor, FrameExtractor, NativeFrameExtractor};

/// What an executor sees besides the task itself.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub pipeline_id: PipelineId,
    /// Snapshots of the task's direct dependencies, keyed by id.
    pub dependencies: HashMap<TaskId, Task>,
}

impl ExecutionContext {
    pub fn new(pipeline_id: impl Into<PipelineId>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            dependencies: HashMap::new(),
        }
    }

    pub fn with_dependency(mut self, task: Task) -> Self {
        self.dependencies.insert(task.id.clone(), task);
        self
    }

    /// Dependencies of `task` in the task's declared order.
    pub fn ordered_dependencies<'a>(&'a self, task: &'a Task) -> impl Iterator<Item = &'a Task> {
        task.dependencies
            .iter()
            .filter_map(|id| self.dependencies.get(id))
    }

    /// Completed dependencies of `task` in declared order.
    pub fn completed_dependencies<'a>(
        &'a self,
        task: &'a Task,
    ) -> impl Iterator<Item = &'a Task> {
        self.ordered_dependencies(task)
            .filter(|t| t.status == TaskStatus::Completed)
    }
}

/// Trait abstracting how a dispatched task is executed.
///
/// Production code uses [`GenerationExecutor`]; tests provide their own
/// implementation that doesn't touch a backend.
pub trait ExecutorBackend: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<MediaOutput>>;
}

/// Executor for every [`TaskPayload`] kind.
pub struct GenerationExecutor {
    backend: Arc<dyn GenerationBackend>,
    queue: GenerationQueue,
    settings: Arc<dyn SettingsProvider>,
    progress: Arc<dyn ProgressSink>,
    frames: Arc<dyn FrameExtractor>,
    export_dir: PathBuf,
}

impl fmt::Debug for GenerationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationExecutor")
            .field("queue", &self.queue)
            .field("export_dir", &self.export_dir)
            .finish_non_exhaustive()
    }
}

impl GenerationExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        queue: GenerationQueue,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            backend,
            queue,
            settings,
            progress: Arc::new(LogProgressSink),
            frames: Arc::new(NativeFrameExtractor::default()),
            export_dir: PathBuf::from("exports"),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_frame_extractor(mut self, frames: Arc<dyn FrameExtractor>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn queue(&self) -> &GenerationQueue {
        &self.queue
    }

    /// Run `execute` under the generation queue when the task's kind is
    /// resource-bound, directly otherwise.
    async fn run_queued<F>(&self, task: &Task, ctx: &ExecutionContext, execute: F) -> Result<MediaOutput>
    where
        F: Future<Output = Result<MediaOutput>>,
    {
        let Some(resource) = task.kind().resource_type() else {
            return execute.await;
        };
        let job = GenerationJob::new(format!("{}/{}", ctx.pipeline_id, task.id), resource, execute)
            .priority(task.priority)
            .metadata("pipeline_id", ctx.pipeline_id.clone())
            .metadata("task", task.id.clone())
            .metadata("kind", task.kind().as_str());
        self.queue.enqueue(job).await
    }
}

impl ExecutorBackend for GenerationExecutor {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<MediaOutput>> {
        Box::pin(async move {
            match &task.payload {
                TaskPayload::KeyframeGenerate(payload) => {
                    let run = keyframe::run(self.backend.as_ref(), task, payload);
                    self.run_queued(task, ctx, run).await
                }
                TaskPayload::VideoGenerate(payload) => {
                    let start = video::resolve_start_image(
                        task,
                        payload,
                        ctx,
                        self.settings.as_ref(),
                        self.frames.as_ref(),
                    )
                    .await?;
                    let run = video::run(
                        self.backend.as_ref(),
                        Arc::clone(&self.progress),
                        task,
                        payload,
                        start,
                    );
                    self.run_queued(task, ctx, run).await
                }
                TaskPayload::Upscale(payload) => {
                    let run = upscale::run(self.backend.as_ref(), task, payload, ctx);
                    self.run_queued(task, ctx, run).await
                }
                TaskPayload::Interpolate(payload) => {
                    let run = interpolate::run(self.backend.as_ref(), task, payload, ctx);
                    self.run_queued(task, ctx, run).await
                }
                TaskPayload::Export(payload) => {
                    export::run(&self.export_dir, task, payload, ctx).await
                }
                TaskPayload::Generic(payload) => generic::run(task, payload, ctx).await,
            }
        })
    }
}
