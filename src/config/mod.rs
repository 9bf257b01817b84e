// src/config/mod.rs

//! Pipeline file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate it into task specs the store accepts (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    PipelineFile, PipelineSection, QueueSection, RawPipelineFile, SchedulerSection,
    SettingsSection, TaskConfig,
};
pub use validate::validate_raw_pipeline;
