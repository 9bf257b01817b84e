// src/exec/keyframe.rs

//! `keyframe-generate`: one still image from a prompt.

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::backend::{GenerationBackend, GenerationRequest, SubmitOptions};
use crate::dag::{KeyframePayload, Task};
use crate::output::{normalize_output, MediaOutput};
use crate::types::TaskKind;

/// Submit the keyframe job and wait for the image. No progress callback is
/// attached; the backend reports none for still images.
pub async fn run(
    backend: &dyn GenerationBackend,
    task: &Task,
    payload: &KeyframePayload,
) -> Result<MediaOutput> {
    let request = GenerationRequest::new(TaskKind::KeyframeGenerate)
        .workflow(payload.workflow.clone())
        .input("prompt", payload.prompt.clone())
        .input(
            "negative_prompt",
            payload.negative_prompt.clone().unwrap_or_default(),
        )
        .input_opt("width", payload.width)
        .input_opt("height", payload.height)
        .input_opt("seed", payload.seed);

    let raw = backend
        .submit(request, SubmitOptions::wait())
        .await
        .with_context(|| format!("keyframe generation for task '{}'", task.id))?;
    let output = normalize_output(raw);

    if output.first_image().is_none() {
        bail!("keyframe generation for task '{}' returned no image", task.id);
    }
    debug!(task = %task.id, images = output.images.as_ref().map_or(0, Vec::len), "keyframe generated");
    Ok(output)
}
