// src/dag/task.rs

//! Task records, their per-kind payloads, and the `TaskSpec` used to build
//! them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::output::MediaOutput;
use crate::types::{TaskId, TaskKind, TaskStatus};

/// Input of a `keyframe-generate` task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyframePayload {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Workflow template overriding the backend default for this kind.
    #[serde(default)]
    pub workflow: Option<PathBuf>,
}

/// Input of a `video-generate` task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoPayload {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Originally planned start image (reference or data URI). Used when
    /// last-frame chaining is off or fails.
    #[serde(default)]
    pub keyframe_image: Option<String>,
    /// Context id progress is reported under (e.g. the scene id).
    #[serde(default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub frames: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub workflow: Option<PathBuf>,
}

fn default_scale() -> f32 {
    2.0
}

/// Input of an `upscale` task. Without `source`, the first image (or video)
/// of a completed dependency is upscaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscalePayload {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub workflow: Option<PathBuf>,
}

impl Default for UpscalePayload {
    fn default() -> Self {
        Self {
            source: None,
            scale: default_scale(),
            workflow: None,
        }
    }
}

fn default_multiplier() -> u32 {
    2
}

/// Input of an `interpolate` task. Without `source`, the first video of a
/// completed dependency is interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolatePayload {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default)]
    pub workflow: Option<PathBuf>,
}

impl Default for InterpolatePayload {
    fn default() -> Self {
        Self {
            source: None,
            multiplier: default_multiplier(),
            workflow: None,
        }
    }
}

/// Input of an `export` task: writes a manifest of every dependency output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportPayload {
    /// Manifest file name; defaults to `<task id>.json`.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Input of a `generic` task. With `cmd`, runs it through the shell;
/// without, passes the dependency outputs through unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericPayload {
    #[serde(default)]
    pub cmd: Option<String>,
}

/// Per-kind task input. The variant is the task's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskPayload {
    KeyframeGenerate(KeyframePayload),
    VideoGenerate(VideoPayload),
    Upscale(UpscalePayload),
    Interpolate(InterpolatePayload),
    Export(ExportPayload),
    Generic(GenericPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::KeyframeGenerate(_) => TaskKind::KeyframeGenerate,
            TaskPayload::VideoGenerate(_) => TaskKind::VideoGenerate,
            TaskPayload::Upscale(_) => TaskKind::Upscale,
            TaskPayload::Interpolate(_) => TaskKind::Interpolate,
            TaskPayload::Export(_) => TaskKind::Export,
            TaskPayload::Generic(_) => TaskKind::Generic,
        }
    }
}

/// Description of a task before it is registered in a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: TaskId,
    pub label: Option<String>,
    pub dependencies: Vec<TaskId>,
    pub max_retries: u32,
    pub priority: i32,
    pub payload: TaskPayload,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            label: None,
            dependencies: Vec::new(),
            max_retries: 0,
            priority: 0,
            payload,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn after(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A task inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub status: TaskStatus,
    /// Ordered dependency ids. Order matters for last-frame chaining, which
    /// picks the first eligible video dependency.
    pub dependencies: Vec<TaskId>,
    pub payload: TaskPayload,
    pub output: Option<MediaOutput>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Generation queue priority (higher runs first).
    pub priority: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, now: DateTime<Utc>) -> Self {
        let label = spec.label.unwrap_or_else(|| spec.id.clone());
        Self {
            id: spec.id,
            label,
            status: TaskStatus::Pending,
            dependencies: spec.dependencies,
            payload: spec.payload,
            output: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            priority: spec.priority,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// First video reference of a completed task's output.
    pub fn completed_video(&self) -> Option<&str> {
        if self.status != TaskStatus::Completed {
            return None;
        }
        self.output.as_ref().and_then(MediaOutput::first_video)
    }

    /// First image reference of a completed task's output.
    pub fn completed_image(&self) -> Option<&str> {
        if self.status != TaskStatus::Completed {
            return None;
        }
        self.output.as_ref().and_then(MediaOutput::first_image)
    }
}
