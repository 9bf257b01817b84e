// src/exec/export.rs

//! `export`: write a JSON manifest of every dependency's output.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::dag::{ExportPayload, Task};
use crate::exec::ExecutionContext;
use crate::output::{MediaAsset, MediaOutput};
use crate::types::{TaskKind, TaskStatus};

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    task: &'a str,
    label: &'a str,
    kind: TaskKind,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a MediaOutput>,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    pipeline_id: &'a str,
    task: &'a str,
    exported_at: String,
    entries: Vec<ManifestEntry<'a>>,
}

/// Write `<export_dir>/<pipeline id>/<file name>` and return it as a
/// `manifest` asset.
pub async fn run(
    export_dir: &Path,
    task: &Task,
    payload: &ExportPayload,
    ctx: &ExecutionContext,
) -> Result<MediaOutput> {
    let manifest = Manifest {
        pipeline_id: &ctx.pipeline_id,
        task: &task.id,
        exported_at: Utc::now().to_rfc3339(),
        entries: ctx
            .ordered_dependencies(task)
            .map(|dep| ManifestEntry {
                task: &dep.id,
                label: &dep.label,
                kind: dep.kind(),
                status: dep.status,
                output: dep.output.as_ref(),
            })
            .collect(),
    };

    let file_name = payload
        .file_name
        .clone()
        .unwrap_or_else(|| format!("{}.json", task.id));
    let dir = export_dir.join(&ctx.pipeline_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating export directory {}", dir.display()))?;

    let path = dir.join(&file_name);
    let body = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing export manifest {}", path.display()))?;

    let path_str = path.to_string_lossy().into_owned();
    info!(
        task = %task.id,
        path = %path_str,
        entries = manifest.entries.len(),
        "export manifest written"
    );

    Ok(MediaOutput {
        assets: Some(vec![MediaAsset {
            asset_type: "manifest".to_string(),
            data: path_str.clone(),
            filename: Some(file_name),
        }]),
        ..MediaOutput::default()
    }
    .with_metadata("exportPath", Value::String(path_str)))
}
