// src/exec/interpolate.rs

use anyhow::{bail, Context, Result};

use crate::backend::{GenerationBackend, GenerationRequest, SubmitOptions};
use crate::dag::{InterpolatePayload, Task};
use crate::exec::ExecutionContext;
use crate::output::{normalize_output, MediaOutput};
use crate::types::TaskKind;

/// Frame interpolation of `source` (or the first completed dependency
/// video) by `multiplier`.
pub async fn run(
    backend: &dyn GenerationBackend,
    task: &Task,
    payload: &InterpolatePayload,
    ctx: &ExecutionContext,
) -> Result<MediaOutput> {
    let source = payload
        .source
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| ctx.completed_dependencies(task).find_map(|dep| dep.completed_video()))
        .map(str::to_string);
    let Some(source) = source else {
        bail!("interpolate task '{}' has no source video", task.id);
    };
    if payload.multiplier < 2 {
        bail!(
            "interpolate task '{}' needs a multiplier of at least 2 (got {})",
            task.id,
            payload.multiplier
        );
    }

    let request = GenerationRequest::new(TaskKind::Interpolate)
        .workflow(payload.workflow.clone())
        .input("multiplier", payload.multiplier)
        .media("source", source);

    let raw = backend
        .submit(request, SubmitOptions::wait())
        .await
        .with_context(|| format!("interpolation for task '{}'", task.id))?;
    let output = normalize_output(raw);
    if output.first_video().is_none() {
        bail!("interpolation for task '{}' returned no video", task.id);
    }
    Ok(output)
}
