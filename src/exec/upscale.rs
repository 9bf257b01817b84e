// src/exec/upscale.rs

use anyhow::{bail, Context, Result};

use crate::backend::{GenerationBackend, GenerationRequest, SubmitOptions};
use crate::dag::{Task, UpscalePayload};
use crate::exec::ExecutionContext;
use crate::output::{normalize_output, MediaOutput};
use crate::types::TaskKind;

/// Explicit `source`, else the first image (then first video) of a completed
/// dependency.
fn upscale_source(task: &Task, payload: &UpscalePayload, ctx: &ExecutionContext) -> Option<String> {
    if let Some(source) = payload.source.as_deref().filter(|s| !s.is_empty()) {
        return Some(source.to_string());
    }
    ctx.completed_dependencies(task)
        .find_map(|dep| dep.completed_image())
        .or_else(|| ctx.completed_dependencies(task).find_map(|dep| dep.completed_video()))
        .map(str::to_string)
}

pub async fn run(
    backend: &dyn GenerationBackend,
    task: &Task,
    payload: &UpscalePayload,
    ctx: &ExecutionContext,
) -> Result<MediaOutput> {
    let Some(source) = upscale_source(task, payload, ctx) else {
        bail!("upscale task '{}' has no source media", task.id);
    };

    let request = GenerationRequest::new(TaskKind::Upscale)
        .workflow(payload.workflow.clone())
        .input("scale", payload.scale)
        .media("source", source);

    let raw = backend
        .submit(request, SubmitOptions::wait())
        .await
        .with_context(|| format!("upscale for task '{}'", task.id))?;
    let output = normalize_output(raw);
    if output.is_empty() {
        bail!("upscale for task '{}' returned no media", task.id);
    }
    Ok(output)
}
