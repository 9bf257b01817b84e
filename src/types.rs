use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed, `Send` future used at the async trait seams (executors, backend,
/// frame extraction).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier of a task, unique within its pipeline.
pub type TaskId = String;

/// Identifier of a pipeline (uuid v4 string).
pub type PipelineId = String;

/// Lifecycle status of a single task.
///
/// `Completed`, `Skipped` and `Cancelled` are always terminal. `Failed` is
/// terminal once retries are exhausted; a task with retries left goes back to
/// `Pending` instead of staying `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    /// Satisfies the "completed or skipped" runnability condition of dependents.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// Statuses that block their dependents forever and trigger a skip cascade.
    pub fn is_blocking_terminal(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Failed | PipelineStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Active => "active",
            PipelineStatus::Paused => "paused",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of task kinds. The payload enum (`dag::TaskPayload`) carries
/// one variant per kind; this is the payload-free discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    KeyframeGenerate,
    VideoGenerate,
    Upscale,
    Interpolate,
    Export,
    Generic,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::KeyframeGenerate,
        TaskKind::VideoGenerate,
        TaskKind::Upscale,
        TaskKind::Interpolate,
        TaskKind::Export,
        TaskKind::Generic,
    ];

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_name(name: &str) -> Option<TaskKind> {
        Self::ALL.into_iter().find(|k| k.as_str() == name.trim())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::KeyframeGenerate => "keyframe-generate",
            TaskKind::VideoGenerate => "video-generate",
            TaskKind::Upscale => "upscale",
            TaskKind::Interpolate => "interpolate",
            TaskKind::Export => "export",
            TaskKind::Generic => "generic",
        }
    }

    /// Resource class used when the kind goes through the generation queue.
    ///
    /// `Export` and `Generic` are cheap and run directly under the engine.
    pub fn resource_type(self) -> Option<ResourceType> {
        match self {
            TaskKind::KeyframeGenerate => Some(ResourceType::Image),
            TaskKind::VideoGenerate => Some(ResourceType::Video),
            TaskKind::Upscale => Some(ResourceType::Upscale),
            TaskKind::Interpolate => Some(ResourceType::Interpolation),
            TaskKind::Export | TaskKind::Generic => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource class of a job submitted to the generation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Upscale,
    Interpolation,
}

/// Which last-frame extraction strategy video tasks use.
///
/// - `Native`: hand the video location straight to `ffmpeg` (headless).
/// - `Fetch`: download the artifact through the backend client first, then
///   decode the final frame locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameExtractorKind {
    #[default]
    Native,
    Fetch,
}
