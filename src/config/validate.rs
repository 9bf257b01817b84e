// src/config/validate.rs

use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::dag::{validate_task_specs, TaskPayload, TaskSpec};
use crate::errors::{GendagError, Result};
use crate::types::TaskKind;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = GendagError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        let specs = validate_raw_pipeline(&raw)?;
        Ok(PipelineFile::new_unchecked(
            raw.pipeline,
            raw.settings,
            raw.scheduler,
            raw.queue,
            specs,
        ))
    }
}

/// Check a raw pipeline file and return its task specs.
pub fn validate_raw_pipeline(raw: &RawPipelineFile) -> Result<Vec<TaskSpec>> {
    ensure_has_tasks(raw)?;
    validate_sections(raw)?;

    let specs: Vec<TaskSpec> = raw
        .task
        .iter()
        .map(|(id, task)| task.to_spec(id))
        .collect();
    for spec in &specs {
        validate_payload(spec)?;
    }
    validate_task_specs(&specs)?;
    Ok(specs)
}

fn ensure_has_tasks(raw: &RawPipelineFile) -> Result<()> {
    if raw.task.is_empty() {
        return Err(GendagError::ConfigError(
            "pipeline must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_sections(raw: &RawPipelineFile) -> Result<()> {
    if raw.scheduler.tick_interval_ms == 0 {
        return Err(GendagError::ConfigError(
            "[scheduler].tick_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.queue.concurrency == 0 {
        return Err(GendagError::ConfigError(
            "[queue].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if raw.settings.backend_url.trim().is_empty() {
        return Err(GendagError::ConfigError(
            "[settings].backend_url must not be empty".to_string(),
        ));
    }
    if let Some(kind) = raw
        .settings
        .workflows
        .keys()
        .find(|k| TaskKind::from_name(k).is_none())
    {
        return Err(GendagError::ConfigError(format!(
            "[settings.workflows] has unknown task type '{kind}'"
        )));
    }
    Ok(())
}

fn validate_payload(spec: &TaskSpec) -> Result<()> {
    match &spec.payload {
        TaskPayload::KeyframeGenerate(p) if p.prompt.trim().is_empty() => Err(
            GendagError::ConfigError(format!("task '{}' needs a non-empty `prompt`", spec.id)),
        ),
        TaskPayload::VideoGenerate(p) if p.prompt.trim().is_empty() => Err(
            GendagError::ConfigError(format!("task '{}' needs a non-empty `prompt`", spec.id)),
        ),
        TaskPayload::Upscale(p) if p.scale.is_nan() || p.scale <= 0.0 => Err(GendagError::ConfigError(format!(
            "task '{}' has invalid `scale` {} (must be > 0)",
            spec.id, p.scale
        ))),
        TaskPayload::Interpolate(p) if p.multiplier < 2 => {
            Err(GendagError::ConfigError(format!(
                "task '{}' has invalid `multiplier` {} (must be >= 2)",
                spec.id, p.multiplier
            )))
        }
        _ => Ok(()),
    }
}
