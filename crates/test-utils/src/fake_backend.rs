use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use gendag::backend::{GenerationBackend, GenerationRequest, SubmitOptions};
use gendag::exec::FrameExtractor;
use gendag::progress::ProgressUpdate;
use gendag::types::{BoxFuture, TaskKind};
use serde_json::{json, Value};

/// What the fake backend saw for one submission.
#[derive(Debug, Clone)]
pub struct RecordedSubmit {
    pub request: GenerationRequest,
    pub wait_for_completion: bool,
    pub had_progress: bool,
}

/// In-memory generation backend.
///
/// Every kind answers with a small canned payload unless overridden with
/// [`respond`](Self::respond). When a progress callback is supplied it
/// receives a `running` and a `complete` update.
#[derive(Debug, Default)]
pub struct FakeBackend {
    responses: Mutex<HashMap<TaskKind, Result<Value, String>>>,
    submits: Mutex<Vec<RecordedSubmit>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, kind: TaskKind, value: Value) -> Self {
        self.responses.lock().unwrap().insert(kind, Ok(value));
        self
    }

    pub fn fail(self, kind: TaskKind, error: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(kind, Err(error.to_string()));
        self
    }

    pub fn artifact(self, reference: &str, bytes: Vec<u8>) -> Self {
        self.artifacts
            .lock()
            .unwrap()
            .insert(reference.to_string(), bytes);
        self
    }

    pub fn submits(&self) -> Vec<RecordedSubmit> {
        self.submits.lock().unwrap().clone()
    }

    fn canned(kind: TaskKind) -> Value {
        match kind {
            TaskKind::KeyframeGenerate => json!({ "images": ["keyframe.png"] }),
            TaskKind::VideoGenerate => json!({ "videos": ["clip.mp4"] }),
            TaskKind::Upscale => json!({ "images": ["upscaled.png"] }),
            TaskKind::Interpolate => json!({ "videos": ["interpolated.mp4"] }),
            TaskKind::Export | TaskKind::Generic => Value::Null,
        }
    }
}

impl GenerationBackend for FakeBackend {
    fn submit<'a>(
        &'a self,
        request: GenerationRequest,
        options: SubmitOptions,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let kind = request.kind;
            self.submits.lock().unwrap().push(RecordedSubmit {
                request,
                wait_for_completion: options.wait_for_completion,
                had_progress: options.progress.is_some(),
            });

            if let Some(progress) = &options.progress {
                progress(ProgressUpdate::status("running").with_progress(0.5));
            }

            let response = self
                .responses
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_else(|| Ok(Self::canned(kind)));

            if let Some(progress) = &options.progress {
                progress(ProgressUpdate::status("complete").with_progress(1.0));
            }
            response.map_err(|e| anyhow!(e))
        })
    }

    fn fetch_artifact<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, anyhow::Result<Vec<u8>>> {
        Box::pin(async move {
            self.artifacts
                .lock()
                .unwrap()
                .get(reference)
                .cloned()
                .ok_or_else(|| anyhow!("no artifact '{reference}'"))
        })
    }
}

/// Scripted last-frame extractor.
#[derive(Debug)]
pub struct FakeFrameExtractor {
    result: Result<Option<String>, String>,
    urls: Mutex<Vec<String>>,
}

impl FakeFrameExtractor {
    /// Always returns `frame`.
    pub fn frame(frame: &str) -> Self {
        Self {
            result: Ok(Some(frame.to_string())),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Decodes nothing.
    pub fn empty() -> Self {
        Self {
            result: Ok(None),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            result: Err(error.to_string()),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every URL extraction was attempted on.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl FrameExtractor for FakeFrameExtractor {
    fn extract_last_frame<'a>(
        &'a self,
        video_url: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(async move {
            self.urls.lock().unwrap().push(video_url.to_string());
            self.result.clone().map_err(|e| anyhow!(e))
        })
    }
}
