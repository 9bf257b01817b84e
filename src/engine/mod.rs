// src/engine/mod.rs

//! Scheduling engine for gendag.
//!
//! Every tick the engine looks at the store's active pipeline and either
//! finalizes it (all terminal, or stuck behind failures) or marks its
//! runnable tasks `running` and hands them to an executor. Execution results
//! flow back as completions that complete, retry or fail the task.
//!
//! The pure, synchronous decision logic lives in [`core`]; the async shell
//! with the tick timer and task spawning lives in [`scheduler`].

pub mod core;
pub mod scheduler;

pub use core::{
    apply_completion, plan_tick, CompletionOutcome, DispatchedTask, TaskCompletion, TickOutcome,
};
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerOptions};
