// src/backend/mod.rs

//! Boundary to the generation backend.
//!
//! Executors only talk to [`GenerationBackend`]. [`comfy::ComfyClient`] is
//! the HTTP implementation used by the binary; tests substitute their own.

pub mod comfy;

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::{Map, Value};

use crate::progress::ProgressUpdate;
use crate::types::{BoxFuture, TaskKind};

pub use comfy::ComfyClient;

/// Callback receiving backend progress while a job runs.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// A media input the backend has to make available to the workflow
/// (e.g. by uploading it) before the job can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInput {
    /// Workflow placeholder that receives the backend-side name.
    pub placeholder: String,
    /// Data URI, URL, or backend artifact reference.
    pub reference: String,
}

/// One generation job as submitted to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub kind: TaskKind,
    /// Workflow template overriding the backend default for `kind`.
    pub workflow: Option<PathBuf>,
    /// Scalar template inputs, keyed by placeholder name.
    pub inputs: Map<String, Value>,
    pub media: Vec<MediaInput>,
}

impl GenerationRequest {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            workflow: None,
            inputs: Map::new(),
            media: Vec::new(),
        }
    }

    pub fn workflow(mut self, workflow: Option<PathBuf>) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Set `name` only when `value` is present.
    pub fn input_opt<V: Into<Value>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.input(name, v),
            None => self,
        }
    }

    pub fn media(mut self, placeholder: impl Into<String>, reference: impl Into<String>) -> Self {
        self.media.push(MediaInput {
            placeholder: placeholder.into(),
            reference: reference.into(),
        });
        self
    }
}

/// How [`GenerationBackend::submit`] behaves.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Wait until the job finished and return its result; otherwise return
    /// right after the job was accepted.
    pub wait_for_completion: bool,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("wait_for_completion", &self.wait_for_completion)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SubmitOptions {
    pub fn wait() -> Self {
        Self {
            wait_for_completion: true,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// Client of the image/video synthesis service.
pub trait GenerationBackend: Send + Sync {
    /// Submit a job. The returned value is the raw backend payload; callers
    /// run it through [`crate::output::normalize_output`].
    fn submit<'a>(
        &'a self,
        request: GenerationRequest,
        options: SubmitOptions,
    ) -> BoxFuture<'a, Result<Value>>;

    /// Fetch the bytes behind an artifact reference.
    fn fetch_artifact<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

static DATA_URI_PREFIX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^data:[A-Za-z0-9.+/-]*(?:;[A-Za-z0-9=.+-]+)*,"));

/// Strip a leading `data:<mime>[;params],` prefix, leaving the payload.
/// Input without such a prefix is returned unchanged.
pub fn strip_data_uri_prefix(value: &str) -> &str {
    match DATA_URI_PREFIX.as_ref().ok().and_then(|re| re.find(value)) {
        Some(m) => &value[m.end()..],
        None => value,
    }
}

/// Decode a base64 data URI (or bare base64 payload) into bytes.
pub fn decode_data_uri(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_uri_prefix(value).trim())
        .context("decoding base64 data URI payload")
}

/// Encode bytes as a `data:<mime>;base64,` URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}
