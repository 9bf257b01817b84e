// src/exec/video.rs

//! `video-generate` with last-frame chaining.
//!
//! When chaining is enabled, the start image of a video task is the last
//! frame of the first completed `video-generate` dependency (in declared
//! dependency order). Any failure along that path falls back to the planned
//! keyframe; the task only fails when no start image can be resolved at all.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::backend::comfy::view_url;
use crate::backend::{GenerationBackend, GenerationRequest, ProgressCallback, SubmitOptions};
use crate::dag::{Task, VideoPayload};
use crate::exec::ExecutionContext;
use crate::exec::frames::FrameExtractor;
use crate::output::{normalize_output, MediaOutput};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::settings::SettingsProvider;
use crate::types::TaskKind;

pub const META_ENABLED: &str = "flf2vEnabled";
pub const META_SOURCE: &str = "flf2vSource";
pub const META_FALLBACK: &str = "flf2vFallback";

/// Where the start image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
    LastFrame,
    Keyframe,
}

impl StartSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StartSource::LastFrame => "last-frame",
            StartSource::Keyframe => "keyframe",
        }
    }
}

/// Resolved start image plus the chaining facts recorded in the output.
#[derive(Debug, Clone, PartialEq)]
pub struct StartImage {
    pub image: String,
    pub source: StartSource,
    pub enabled: bool,
    /// A last-frame attempt was made and failed.
    pub fallback: bool,
}

impl StartImage {
    pub fn metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert(META_ENABLED.to_string(), Value::Bool(self.enabled));
        meta.insert(
            META_SOURCE.to_string(),
            Value::String(self.source.as_str().to_string()),
        );
        meta.insert(META_FALLBACK.to_string(), Value::Bool(self.fallback));
        meta
    }
}

/// Turn a video reference into something `ffmpeg` or HTTP can fetch.
///
/// `http(s)://`, `file://`, `data:` and absolute paths pass through; anything
/// else is treated as a backend `subfolder/filename` reference.
pub fn resolve_video_url(reference: &str, base_url: &str) -> String {
    let absolute = reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("file://")
        || reference.starts_with("data:")
        || reference.starts_with('/');
    if absolute {
        reference.to_string()
    } else {
        view_url(base_url, reference)
    }
}

/// First completed `video-generate` dependency with a video, in declared order.
pub fn chain_source<'a>(task: &'a Task, ctx: &'a ExecutionContext) -> Option<&'a Task> {
    ctx.completed_dependencies(task)
        .find(|dep| dep.kind() == TaskKind::VideoGenerate && dep.completed_video().is_some())
}

/// Planned keyframe: the payload's image, else the first image of a
/// completed `keyframe-generate` dependency.
fn planned_keyframe(task: &Task, payload: &VideoPayload, ctx: &ExecutionContext) -> Option<String> {
    payload
        .keyframe_image
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ctx.completed_dependencies(task)
                .filter(|dep| dep.kind() == TaskKind::KeyframeGenerate)
                .find_map(|dep| dep.completed_image().map(str::to_string))
        })
}

/// Pick the start image for a video task.
pub async fn resolve_start_image(
    task: &Task,
    payload: &VideoPayload,
    ctx: &ExecutionContext,
    settings: &dyn SettingsProvider,
    frames: &dyn FrameExtractor,
) -> Result<StartImage> {
    let enabled = settings.flf2v_enabled();
    let mut attempted = false;

    if enabled {
        if let Some(source) = chain_source(task, ctx) {
            attempted = true;
            let reference = source.completed_video().unwrap_or_default();
            let url = resolve_video_url(reference, &settings.backend_base_url());
            match frames.extract_last_frame(&url).await {
                Ok(Some(frame)) => {
                    info!(
                        task = %task.id,
                        source_task = %source.id,
                        "chaining from last frame of previous video"
                    );
                    return Ok(StartImage {
                        image: frame,
                        source: StartSource::LastFrame,
                        enabled,
                        fallback: false,
                    });
                }
                Ok(None) => {
                    warn!(task = %task.id, source_task = %source.id, url = %url, "no last frame extracted; falling back to keyframe");
                }
                Err(err) => {
                    warn!(
                        task = %task.id,
                        source_task = %source.id,
                        url = %url,
                        error = %format!("{err:#}"),
                        "last-frame extraction failed; falling back to keyframe"
                    );
                }
            }
        } else {
            debug!(task = %task.id, "no completed video dependency to chain from");
        }
    }

    match planned_keyframe(task, payload, ctx) {
        Some(image) => Ok(StartImage {
            image,
            source: StartSource::Keyframe,
            enabled,
            fallback: attempted,
        }),
        None => bail!(
            "video task '{}' has no start image: no keyframe_image and no completed keyframe dependency",
            task.id
        ),
    }
}

/// Submit the video job from `start`, forwarding progress to `progress`
/// under the task's scene id (or its own id).
pub async fn run(
    backend: &dyn GenerationBackend,
    progress: Arc<dyn ProgressSink>,
    task: &Task,
    payload: &VideoPayload,
    start: StartImage,
) -> Result<MediaOutput> {
    let context_id = payload
        .scene_id
        .clone()
        .unwrap_or_else(|| task.id.clone());
    let callback: ProgressCallback =
        Arc::new(move |update: ProgressUpdate| progress.report(&context_id, update));

    let request = GenerationRequest::new(TaskKind::VideoGenerate)
        .workflow(payload.workflow.clone())
        .input("prompt", payload.prompt.clone())
        .input(
            "negative_prompt",
            payload.negative_prompt.clone().unwrap_or_default(),
        )
        .input_opt("frames", payload.frames)
        .input_opt("fps", payload.fps)
        .input_opt("seed", payload.seed)
        .media("start_image", start.image.clone());

    let raw = backend
        .submit(request, SubmitOptions::wait().with_progress(callback))
        .await
        .with_context(|| format!("video generation for task '{}'", task.id))?;

    let mut output = normalize_output(raw);
    if output.first_video().is_none() {
        bail!("video generation for task '{}' returned no video", task.id);
    }
    for (key, value) in start.metadata() {
        output.set_metadata(key, value);
    }
    Ok(output)
}
