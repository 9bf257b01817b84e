#![allow(dead_code)]

use std::error::Error;
use std::io::Write;

use gendag::dag::{PipelineStore, TaskSpec};
use gendag::types::PipelineId;
use tempfile::NamedTempFile;

pub use gendag_test_utils::builders;
pub use gendag_test_utils::init_tracing;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Fresh store with one pipeline built from `specs`, set active.
pub fn store_with_active(specs: Vec<TaskSpec>) -> (PipelineStore, PipelineId) {
    let mut store = PipelineStore::new();
    let id = store
        .create_pipeline("test", specs)
        .expect("pipeline should be valid");
    store.set_active_pipeline(Some(&id));
    (store, id)
}

/// Write `contents` to a temporary `.toml` file.
pub fn write_pipeline_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp pipeline file");
    write!(file, "{contents}").expect("write temp pipeline file");
    file
}
