// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GendagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, GendagError>;
