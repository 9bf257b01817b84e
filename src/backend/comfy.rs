// src/backend/comfy.rs

//! HTTP client for a ComfyUI-style backend.
//!
//! Jobs are workflow JSON templates with `{{name}}` placeholders. A string
//! that is exactly one placeholder is replaced by the typed input value;
//! placeholders embedded in longer strings are replaced textually.
//!
//! Endpoints used: `POST /prompt`, `GET /history/{id}`, `GET /view`,
//! `POST /upload/image`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::progress::ProgressUpdate;
use crate::types::{BoxFuture, TaskKind};

use super::{decode_data_uri, GenerationBackend, GenerationRequest, ProgressCallback, SubmitOptions};

/// Response of `POST /prompt`.
#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

/// Response of `POST /upload/image`.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
    #[serde(default)]
    subfolder: String,
}

/// Backend client speaking the ComfyUI HTTP API.
#[derive(Debug, Clone)]
pub struct ComfyClient {
    base_url: String,
    client: reqwest::Client,
    workflows: HashMap<TaskKind, PathBuf>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ComfyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            workflows: HashMap::new(),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Default workflow template for tasks of `kind`.
    pub fn with_workflow(mut self, kind: TaskKind, path: impl Into<PathBuf>) -> Self {
        self.workflows.insert(kind, path.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/view?filename=..&subfolder=..&type=output` for a
    /// `subfolder/filename` reference.
    pub fn view_url(&self, reference: &str) -> String {
        view_url(&self.base_url, reference)
    }

    fn workflow_path<'a>(&'a self, request: &'a GenerationRequest) -> Result<&'a Path> {
        request
            .workflow
            .as_deref()
            .or_else(|| self.workflows.get(&request.kind).map(PathBuf::as_path))
            .with_context(|| format!("no workflow template configured for {} tasks", request.kind))
    }

    async fn run(&self, request: GenerationRequest, options: SubmitOptions) -> Result<Value> {
        let path = self.workflow_path(&request)?.to_path_buf();
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading workflow template {}", path.display()))?;
        let template: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing workflow template {}", path.display()))?;

        let mut inputs = request.inputs.clone();
        for media in &request.media {
            let name = self.upload(&media.reference).await?;
            inputs.insert(media.placeholder.clone(), Value::String(name));
        }
        let workflow = fill_template(template, &inputs);

        let prompt_id = self.queue_prompt(workflow).await?;
        info!(prompt_id = %prompt_id, kind = %request.kind, "backend job queued");
        report(&options.progress, ProgressUpdate::status("queued"));

        if !options.wait_for_completion {
            return Ok(json!({ "prompt_id": prompt_id }));
        }
        self.wait_for_history(&prompt_id, &options.progress).await
    }

    async fn queue_prompt(&self, workflow: Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&json!({
                "prompt": workflow,
                "client_id": Uuid::new_v4().to_string(),
            }))
            .send()
            .await
            .context("sending prompt to backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("backend rejected prompt: {status} - {body}");
        }

        let parsed: PromptResponse = response.json().await.context("decoding prompt response")?;
        Ok(parsed.prompt_id)
    }

    /// Poll `/history/{id}` until the job finished, failed or timed out.
    async fn wait_for_history(
        &self,
        prompt_id: &str,
        progress: &Option<ProgressCallback>,
    ) -> Result<Value> {
        let deadline = Instant::now() + self.timeout;
        let mut announced_running = false;

        loop {
            if let Some(mut entry) = self.history_entry(prompt_id).await? {
                let status = entry
                    .pointer("/status/status_str")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if status == "error" {
                    report(progress, ProgressUpdate::status("error"));
                    bail!("backend job {prompt_id} failed");
                }
                let completed = entry
                    .pointer("/status/completed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let has_outputs = entry
                    .get("outputs")
                    .and_then(Value::as_object)
                    .is_some_and(|o| !o.is_empty());

                if completed || (has_outputs && status == "success") {
                    report(progress, ProgressUpdate::status("complete").with_progress(1.0));
                    if let Some(obj) = entry.as_object_mut() {
                        obj.insert("prompt_id".to_string(), Value::String(prompt_id.to_string()));
                    }
                    return Ok(entry);
                }
            }

            if !announced_running {
                report(progress, ProgressUpdate::status("running"));
                announced_running = true;
            }
            if Instant::now() >= deadline {
                bail!(
                    "backend job {prompt_id} did not finish within {}s",
                    self.timeout.as_secs()
                );
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn history_entry(&self, prompt_id: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, prompt_id))
            .send()
            .await
            .context("polling backend history")?;

        if !response.status().is_success() {
            bail!("failed to get job history: {}", response.status());
        }

        let mut history: Map<String, Value> =
            response.json().await.context("decoding history response")?;
        Ok(history.remove(prompt_id))
    }

    /// Make `reference` available to the backend and return the name a
    /// workflow loader node should use.
    async fn upload(&self, reference: &str) -> Result<String> {
        let bytes = if reference.starts_with("data:") {
            decode_data_uri(reference)?
        } else if reference.starts_with("http://") || reference.starts_with("https://") {
            self.get_bytes(reference).await?
        } else {
            // Already a backend-side artifact.
            return Ok(reference.to_string());
        };

        let file_name = format!("gendag-{}.png", Uuid::new_v4());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("uploading media input to backend")?;
        if !response.status().is_success() {
            bail!("backend rejected upload: {}", response.status());
        }
        let uploaded: UploadResponse = response.json().await.context("decoding upload response")?;
        debug!(name = %uploaded.name, "media input uploaded");

        Ok(if uploaded.subfolder.is_empty() {
            uploaded.name
        } else {
            format!("{}/{}", uploaded.subfolder, uploaded.name)
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        if !response.status().is_success() {
            bail!("fetching {url} failed: {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl GenerationBackend for ComfyClient {
    fn submit<'a>(
        &'a self,
        request: GenerationRequest,
        options: SubmitOptions,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.run(request, options))
    }

    fn fetch_artifact<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if reference.starts_with("data:") {
                return decode_data_uri(reference);
            }
            let url = if reference.starts_with("http://") || reference.starts_with("https://") {
                reference.to_string()
            } else {
                self.view_url(reference)
            };
            self.get_bytes(&url).await
        })
    }
}

fn report(progress: &Option<ProgressCallback>, update: ProgressUpdate) {
    if let Some(callback) = progress {
        callback(update);
    }
}

/// Build the artifact retrieval URL for a `subfolder/filename` reference.
pub fn view_url(base_url: &str, reference: &str) -> String {
    let reference = reference.trim_start_matches('/');
    let (subfolder, filename) = match reference.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", reference),
    };
    format!(
        "{}/view?filename={}&subfolder={}&type=output",
        base_url.trim_end_matches('/'),
        urlencoding::encode(filename),
        urlencoding::encode(subfolder)
    )
}

/// Replace `{{name}}` placeholders in every string of `template`.
pub fn fill_template(template: Value, inputs: &Map<String, Value>) -> Value {
    match template {
        Value::String(s) => fill_string(s, inputs),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| fill_template(v, inputs)).collect())
        }
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, fill_template(v, inputs)))
                .collect(),
        ),
        other => other,
    }
}

fn fill_string(s: String, inputs: &Map<String, Value>) -> Value {
    let trimmed = s.trim();
    if let Some(name) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
    {
        if let Some(value) = inputs.get(name.trim()) {
            return value.clone();
        }
    }

    if !s.contains("{{") {
        return Value::String(s);
    }
    let mut out = s;
    for (name, value) in inputs {
        let needle = format!("{{{{{name}}}}}");
        if out.contains(&needle) {
            let text = match value {
                Value::String(v) => v.clone(),
                other => other.to_string(),
            };
            out = out.replace(&needle, &text);
        }
    }
    Value::String(out)
}
