// src/output.rs

//! Canonical media output of a task, and the normalizer that coerces the
//! ad-hoc shapes executors and the backend produce into it.
//!
//! Accepted input shapes:
//! - single asset: `{ "type": "image", "data": "...", "filename": "a.png" }`
//! - multi asset: `{ "images": [...], "videos": [...], "assets": [...] }`
//! - backend history entry: `{ "outputs": { "<node>": { "images": [{ "filename", "subfolder", "type" }] } } }`
//! - a bare string (reference or data URI), or an array of any of the above.
//!
//! List membership is inferred from the asset `type` (or the file extension /
//! data-URI mime type) whenever the list fields are absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "gif", "avi"];

/// One named binary or referenced artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    #[serde(rename = "type")]
    pub asset_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Canonical task output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<MediaAsset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl MediaOutput {
    pub fn first_image(&self) -> Option<&str> {
        self.images
            .as_deref()
            .and_then(|v| v.iter().find(|s| !s.is_empty()))
            .map(String::as_str)
    }

    pub fn first_video(&self) -> Option<&str> {
        self.videos
            .as_deref()
            .and_then(|v| v.iter().find(|s| !s.is_empty()))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.images.as_ref().is_none_or(Vec::is_empty)
            && self.videos.as_ref().is_none_or(Vec::is_empty)
            && self.assets.as_ref().is_none_or(Vec::is_empty)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Insert (or overwrite) one metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }

    /// Builder-style [`set_metadata`](Self::set_metadata).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Merge another output into this one: lists are appended, metadata keys
    /// from `other` win.
    pub fn merge(&mut self, other: MediaOutput) {
        append(&mut self.images, other.images);
        append(&mut self.videos, other.videos);
        append(&mut self.assets, other.assets);
        if let Some(meta) = other.metadata {
            let target = self.metadata.get_or_insert_with(Map::new);
            for (k, v) in meta {
                target.insert(k, v);
            }
        }
    }
}

fn append<T>(target: &mut Option<Vec<T>>, extra: Option<Vec<T>>) {
    if let Some(extra) = extra {
        if extra.is_empty() {
            return;
        }
        target.get_or_insert_with(Vec::new).extend(extra);
    }
}

/// What kind of media a reference or data URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Image,
    Video,
    Other,
}

/// Classify a reference by data-URI mime type or file extension.
pub fn classify_reference(reference: &str) -> MediaClass {
    if let Some(rest) = reference.strip_prefix("data:") {
        return if rest.starts_with("image/") {
            MediaClass::Image
        } else if rest.starts_with("video/") {
            MediaClass::Video
        } else {
            MediaClass::Other
        };
    }

    // Drop any query string before looking at the extension.
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaClass::Image
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaClass::Video
    } else {
        MediaClass::Other
    }
}

fn classify_asset_type(asset_type: &str, data: &str, filename: Option<&str>) -> MediaClass {
    let t = asset_type.to_ascii_lowercase();
    if t == "image" || t.starts_with("image/") {
        return MediaClass::Image;
    }
    if t == "video" || t.starts_with("video/") {
        return MediaClass::Video;
    }
    match filename.map(classify_reference) {
        Some(MediaClass::Other) | None => classify_reference(data),
        Some(class) => class,
    }
}

/// Normalize any executor/backend result into a [`MediaOutput`].
pub fn normalize_output(raw: Value) -> MediaOutput {
    match raw {
        Value::Null => MediaOutput::default(),
        Value::String(s) => from_reference(s),
        Value::Array(items) => {
            let mut out = MediaOutput::default();
            for item in items {
                out.merge(normalize_output(item));
            }
            out
        }
        Value::Object(obj) => from_object(obj),
        other => MediaOutput::default().with_metadata("value", other),
    }
}

fn from_reference(reference: String) -> MediaOutput {
    if reference.is_empty() {
        return MediaOutput::default();
    }
    match classify_reference(&reference) {
        MediaClass::Image => MediaOutput {
            images: Some(vec![reference]),
            ..Default::default()
        },
        MediaClass::Video => MediaOutput {
            videos: Some(vec![reference]),
            ..Default::default()
        },
        MediaClass::Other => MediaOutput {
            assets: Some(vec![MediaAsset {
                asset_type: "file".to_string(),
                data: reference,
                filename: None,
            }]),
            ..Default::default()
        },
    }
}

fn from_object(mut obj: Map<String, Value>) -> MediaOutput {
    let metadata = match obj.remove("metadata") {
        Some(Value::Object(m)) => Some(m),
        _ => None,
    };

    // Backend history entry.
    if let Some(Value::Object(nodes)) = obj.remove("outputs") {
        let mut out = from_history_outputs(nodes);
        if let Some(Value::String(id)) = obj.get("prompt_id") {
            out.set_metadata("promptId", Value::String(id.clone()));
        }
        if let Some(meta) = metadata {
            out.merge(MediaOutput {
                metadata: Some(meta),
                ..Default::default()
            });
        }
        return out;
    }

    let images = obj.remove("images").map(reference_list);
    let videos = obj.remove("videos").map(reference_list);
    let assets = obj.remove("assets").map(asset_list);

    let mut out = MediaOutput {
        images,
        videos,
        assets,
        metadata,
    };

    // Single-asset shape.
    if let Some(Value::String(data)) = obj.get("data") {
        let asset_type = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("file")
            .to_string();
        let filename = obj
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string);
        out.assets.get_or_insert_with(Vec::new).push(MediaAsset {
            asset_type,
            data: data.clone(),
            filename,
        });
    }

    infer_lists_from_assets(&mut out);
    out
}

/// Fill `images`/`videos` from `assets` when the list fields are absent.
fn infer_lists_from_assets(out: &mut MediaOutput) {
    let Some(assets) = out.assets.as_ref() else {
        return;
    };
    let fill_images = out.images.is_none();
    let fill_videos = out.videos.is_none();
    if !fill_images && !fill_videos {
        return;
    }

    let mut images = Vec::new();
    let mut videos = Vec::new();
    for asset in assets {
        match classify_asset_type(&asset.asset_type, &asset.data, asset.filename.as_deref()) {
            MediaClass::Image => images.push(asset.data.clone()),
            MediaClass::Video => videos.push(asset.data.clone()),
            MediaClass::Other => {}
        }
    }

    if fill_images && !images.is_empty() {
        out.images = Some(images);
    }
    if fill_videos && !videos.is_empty() {
        out.videos = Some(videos);
    }
}

fn reference_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(reference_from_value).collect(),
        other => reference_from_value(other).into_iter().collect(),
    }
}

fn reference_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(obj) => file_ref(&obj),
        _ => None,
    }
}

/// `{ filename, subfolder }` -> `subfolder/filename`.
fn file_ref(obj: &Map<String, Value>) -> Option<String> {
    let filename = obj.get("filename").and_then(Value::as_str)?;
    match obj.get("subfolder").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => Some(format!("{sub}/{filename}")),
        _ => Some(filename.to_string()),
    }
}

fn asset_list(value: Value) -> Vec<MediaAsset> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<MediaAsset>(item).ok())
        .collect()
}

fn from_history_outputs(nodes: Map<String, Value>) -> MediaOutput {
    let mut images = Vec::new();
    let mut videos = Vec::new();

    for (_node, node_out) in nodes {
        let Value::Object(node_out) = node_out else {
            continue;
        };
        for key in ["images", "gifs", "videos"] {
            let Some(Value::Array(entries)) = node_out.get(key) else {
                continue;
            };
            for entry in entries {
                let Some(reference) = entry.as_object().and_then(file_ref) else {
                    continue;
                };
                match (key, classify_reference(&reference)) {
                    (_, MediaClass::Video) | ("gifs" | "videos", MediaClass::Other) => {
                        videos.push(reference)
                    }
                    _ => images.push(reference),
                }
            }
        }
    }

    MediaOutput {
        images: (!images.is_empty()).then_some(images),
        videos: (!videos.is_empty()).then_some(videos),
        assets: None,
        metadata: None,
    }
}
