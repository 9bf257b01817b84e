#![allow(dead_code)]

use chrono::Utc;
use gendag::dag::{
    ExportPayload, GenericPayload, KeyframePayload, Task, TaskPayload, TaskSpec, VideoPayload,
};
use gendag::output::MediaOutput;
use gendag::types::TaskStatus;

/// `generic` task spec without a command (passes dependency outputs through).
pub fn generic(id: &str) -> TaskSpec {
    TaskSpec::new(id, TaskPayload::Generic(GenericPayload::default()))
}

/// `keyframe-generate` task spec.
pub fn keyframe(id: &str, prompt: &str) -> TaskSpec {
    TaskSpec::new(
        id,
        TaskPayload::KeyframeGenerate(KeyframePayload {
            prompt: prompt.to_string(),
            ..KeyframePayload::default()
        }),
    )
}

/// `video-generate` task spec.
pub fn video(id: &str, prompt: &str) -> TaskSpec {
    TaskSpec::new(
        id,
        TaskPayload::VideoGenerate(VideoPayload {
            prompt: prompt.to_string(),
            ..VideoPayload::default()
        }),
    )
}

pub fn export(id: &str) -> TaskSpec {
    TaskSpec::new(id, TaskPayload::Export(ExportPayload::default()))
}

/// Builder for a `Vec<TaskSpec>` describing a pipeline.
#[derive(Default)]
pub struct PipelineBuilder {
    specs: Vec<TaskSpec>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, spec: TaskSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Generic task `id` depending on every id in `deps`.
    pub fn generic(mut self, id: &str, deps: &[&str]) -> Self {
        let mut spec = generic(id);
        for dep in deps {
            spec = spec.after(*dep);
        }
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Vec<TaskSpec> {
        self.specs
    }
}

/// Standalone task snapshot in `status`, as an executor would see a
/// dependency.
pub fn task_with_status(spec: TaskSpec, status: TaskStatus, output: Option<MediaOutput>) -> Task {
    let mut task = Task::from_spec(spec, Utc::now());
    task.status = status;
    task.output = output;
    task
}

/// Completed `video-generate` dependency whose output is `video`.
pub fn completed_video(id: &str, video_ref: &str) -> Task {
    task_with_status(
        video(id, "previous shot"),
        TaskStatus::Completed,
        Some(MediaOutput {
            videos: Some(vec![video_ref.to_string()]),
            ..MediaOutput::default()
        }),
    )
}

/// Completed `keyframe-generate` dependency whose output is `image`.
pub fn completed_keyframe(id: &str, image_ref: &str) -> Task {
    task_with_status(
        keyframe(id, "keyframe"),
        TaskStatus::Completed,
        Some(MediaOutput {
            images: Some(vec![image_ref.to_string()]),
            ..MediaOutput::default()
        }),
    )
}
