// src/exec/frames.rs

//! Last-frame extraction for frame chaining.
//!
//! Both strategies delegate decoding to `ffmpeg` and return the frame as a
//! `data:image/png;base64,...` URI. `Ok(None)` means the video decoded but
//! yielded no frame.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::backend::{decode_data_uri, encode_data_uri, GenerationBackend};
use crate::types::BoxFuture;

/// Strategy for pulling the final frame out of a video.
pub trait FrameExtractor: Send + Sync {
    fn extract_last_frame<'a>(&'a self, video_url: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
}

/// Hands the video location straight to `ffmpeg`. Used headless, where
/// `ffmpeg` can reach the backend itself.
#[derive(Debug, Clone)]
pub struct NativeFrameExtractor {
    ffmpeg: PathBuf,
}

impl NativeFrameExtractor {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for NativeFrameExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FrameExtractor for NativeFrameExtractor {
    fn extract_last_frame<'a>(&'a self, video_url: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            // ffmpeg cannot read data URIs; spill those to disk first.
            if video_url.starts_with("data:") {
                let bytes = decode_data_uri(video_url)?;
                return extract_from_bytes(&self.ffmpeg, &bytes).await;
            }
            let png = last_frame_png(&self.ffmpeg, video_url).await?;
            Ok(png.map(|bytes| encode_data_uri("image/png", &bytes)))
        })
    }
}

/// Downloads the artifact through the backend client, then decodes it
/// locally from a temporary file.
#[derive(Clone)]
pub struct FetchingFrameExtractor {
    backend: Arc<dyn GenerationBackend>,
    ffmpeg: PathBuf,
}

impl std::fmt::Debug for FetchingFrameExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchingFrameExtractor")
            .field("ffmpeg", &self.ffmpeg)
            .finish_non_exhaustive()
    }
}

impl FetchingFrameExtractor {
    pub fn new(backend: Arc<dyn GenerationBackend>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl FrameExtractor for FetchingFrameExtractor {
    fn extract_last_frame<'a>(&'a self, video_url: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let bytes = self
                .backend
                .fetch_artifact(video_url)
                .await
                .with_context(|| format!("fetching video {video_url}"))?;
            if bytes.is_empty() {
                return Ok(None);
            }
            extract_from_bytes(&self.ffmpeg, &bytes).await
        })
    }
}

async fn extract_from_bytes(ffmpeg: &Path, bytes: &[u8]) -> Result<Option<String>> {
    // Removed from disk when dropped, including when this future is.
    let video = tempfile::Builder::new()
        .prefix("gendag-frame-")
        .suffix(".video")
        .tempfile()
        .context("creating temporary video file")?;
    tokio::fs::write(video.path(), bytes)
        .await
        .with_context(|| format!("writing temporary video {}", video.path().display()))?;

    let png = last_frame_png(ffmpeg, &video.path().to_string_lossy()).await?;
    Ok(png.map(|png| encode_data_uri("image/png", &png)))
}

/// Decode the final frame of `input` as PNG bytes.
async fn last_frame_png(ffmpeg: &Path, input: &str) -> Result<Option<Vec<u8>>> {
    debug!(input = %input, "extracting last frame");
    let output = Command::new(ffmpeg)
        .args(["-v", "error", "-sseof", "-1", "-i"])
        .arg(input)
        .args([
            "-vf", "reverse", "-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("spawning {}", ffmpeg.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg exited with {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }
    if output.stdout.is_empty() {
        return Ok(None);
    }
    Ok(Some(output.stdout))
}
