// src/dag/mod.rs

//! Task graph data model and its store.
//!
//! - [`task`] holds `Task`, the per-kind `TaskPayload` union and `TaskSpec`.
//! - [`pipeline`] groups tasks into a pipeline with its own status.
//! - [`graph`] keeps dependency/dependent adjacency for cascades.
//! - [`validate`] rejects unknown dependencies and cycles at creation time.
//! - [`store`] owns every pipeline and all state transitions.

pub mod graph;
pub mod pipeline;
pub mod store;
pub mod task;
pub mod validate;

pub use graph::DagGraph;
pub use pipeline::{Pipeline, PipelineSummary};
pub use store::{PipelineStore, SharedStore};
pub use task::{
    ExportPayload, GenericPayload, InterpolatePayload, KeyframePayload, Task, TaskPayload,
    TaskSpec, UpscalePayload, VideoPayload,
};
pub use validate::{topological_order, validate_task_specs};
