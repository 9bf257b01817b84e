// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `gendag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gendag",
    version,
    about = "Drive a DAG of image/video generation tasks to completion.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline definition (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub pipeline: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GENDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the tasks in dependency order, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[scheduler].tick_interval_ms`.
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Disable last-frame chaining regardless of `[settings].flf2v_enabled`.
    #[arg(long)]
    pub no_flf2v: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
