// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{TaskPayload, TaskSpec};
use crate::engine::SchedulerOptions;
use crate::queue::QueueOptions;
use crate::types::{FrameExtractorKind, TaskKind};

/// Top-level pipeline file as read from TOML, before validation.
///
/// ```toml
/// [pipeline]
/// name = "scene-001"
///
/// [settings]
/// backend_url = "http://127.0.0.1:8188"
/// flf2v_enabled = true
///
/// [task.kf1]
/// type = "keyframe-generate"
/// prompt = "a lighthouse at dusk"
///
/// [task.v1]
/// type = "video-generate"
/// after = ["kf1"]
/// prompt = "waves rolling in"
/// ```
///
/// All sections except `[task.<id>]` are optional and have defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub settings: SettingsSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub queue: QueueSection,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated pipeline file.
///
/// Only constructed through `TryFrom<RawPipelineFile>` (see
/// `config::validate`), so holding one means the task graph is sound.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pipeline: PipelineSection,
    settings: SettingsSection,
    scheduler: SchedulerSection,
    queue: QueueSection,
    tasks: Vec<TaskSpec>,
}

impl PipelineFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        settings: SettingsSection,
        scheduler: SchedulerSection,
        queue: QueueSection,
        tasks: Vec<TaskSpec>,
    ) -> Self {
        Self {
            pipeline,
            settings,
            scheduler,
            queue,
            tasks,
        }
    }

    /// Pipeline name, or `fallback` when `[pipeline].name` is unset.
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.pipeline.name.as_deref().unwrap_or(fallback)
    }

    pub fn settings(&self) -> &SettingsSection {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsSection {
        &mut self.settings
    }

    pub fn scheduler(&self) -> &SchedulerSection {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SchedulerSection {
        &mut self.scheduler
    }

    pub fn queue(&self) -> &QueueSection {
        &self.queue
    }

    /// Task specs in task-id order.
    pub fn task_specs(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            tick_interval: Duration::from_millis(self.scheduler.tick_interval_ms),
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            concurrency: self.queue.concurrency,
            breaker_threshold: self.queue.circuit_breaker_threshold,
            breaker_cooldown: Duration::from_secs(self.queue.circuit_breaker_cooldown_secs),
        }
    }

    /// Resolve relative paths (export dir, workflow templates) against `base`,
    /// usually the directory containing the pipeline file.
    pub fn rebase_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        rebase(&mut self.settings.export_dir);
        for path in self.settings.workflows.values_mut() {
            rebase(path);
        }
        for spec in &mut self.tasks {
            let workflow = match &mut spec.payload {
                TaskPayload::KeyframeGenerate(p) => p.workflow.as_mut(),
                TaskPayload::VideoGenerate(p) => p.workflow.as_mut(),
                TaskPayload::Upscale(p) => p.workflow.as_mut(),
                TaskPayload::Interpolate(p) => p.workflow.as_mut(),
                TaskPayload::Export(_) | TaskPayload::Generic(_) => None,
            };
            if let Some(path) = workflow {
                rebase(path);
            }
        }
    }

    /// Default workflow templates keyed by task kind. Keys were checked
    /// during validation.
    pub fn workflows(&self) -> impl Iterator<Item = (TaskKind, &Path)> {
        self.settings
            .workflows
            .iter()
            .filter_map(|(kind, path)| TaskKind::from_name(kind).map(|k| (k, path.as_path())))
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineSection {
    /// Display name; defaults to the file stem.
    #[serde(default)]
    pub name: Option<String>,
}

/// `[settings]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsSection {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Last-frame chaining for video tasks.
    #[serde(default = "default_true")]
    pub flf2v_enabled: bool,

    /// `"native"` (default) or `"fetch"`.
    #[serde(default)]
    pub frame_extractor: FrameExtractorKind,

    /// `ffmpeg` executable used for last-frame extraction.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Where `export` tasks write their manifests.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,

    /// Default workflow template per task kind, e.g.
    /// `keyframe-generate = "workflows/t2i.json"`.
    #[serde(default)]
    pub workflows: BTreeMap<String, PathBuf>,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            flf2v_enabled: true,
            frame_extractor: FrameExtractorKind::default(),
            ffmpeg: default_ffmpeg(),
            export_dir: default_export_dir(),
            workflows: BTreeMap::new(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Jobs allowed on the backend at once, across all kinds.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Consecutive failures that open the circuit breaker; 0 disables it.
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown_secs")]
    pub circuit_breaker_cooldown_secs: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

/// `[task.<id>]` section. The `type` key selects the payload variant; the
/// remaining keys are the payload's fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub label: Option<String>,

    /// Dependency list: this task waits for all tasks listed here. Order is
    /// kept; chaining picks the first eligible video dependency.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub max_retries: u32,

    /// Generation queue priority; higher runs first.
    #[serde(default)]
    pub priority: i32,

    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl TaskConfig {
    pub fn to_spec(&self, id: &str) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            label: self.label.clone(),
            dependencies: self.after.clone(),
            max_retries: self.max_retries,
            priority: self.priority,
            payload: self.payload.clone(),
        }
    }
}
