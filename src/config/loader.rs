// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::errors::Result;

/// Load a pipeline file from a given path and return the raw
/// `RawPipelineFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (DAG correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawPipelineFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a pipeline file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for unknown `after` references, self dependencies, cycles and
///   basic section sanity.
/// - Resolves relative paths against the file's directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let mut file = PipelineFile::try_from(raw)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        file.rebase_paths(dir);
    }
    debug!(
        path = %path.display(),
        tasks = file.task_specs().len(),
        "pipeline file loaded"
    );
    Ok(file)
}
