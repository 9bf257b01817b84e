// src/progress.rs

//! Progress reporting for long-running generation jobs.
//!
//! The backend client reports [`ProgressUpdate`]s through a callback; video
//! executors forward them to a [`ProgressSink`] keyed by a caller-chosen
//! context id (usually the scene id).

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// One progress notification from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Backend status word, e.g. `queued`, `running`, `complete`.
    pub status: Option<String>,
    pub message: Option<String>,
    /// Fraction in `0.0..=1.0` when known.
    pub progress: Option<f32>,
}

impl ProgressUpdate {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// External status store receiving progress per context id.
pub trait ProgressSink: Send + Sync {
    fn report(&self, context_id: &str, update: ProgressUpdate);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&self, context_id: &str, update: ProgressUpdate) {
        debug!(
            context = %context_id,
            status = ?update.status,
            progress = ?update.progress,
            message = ?update.message,
            "generation progress"
        );
    }
}

/// Sink keeping every update in memory, keyed by context id.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    updates: Mutex<HashMap<String, Vec<ProgressUpdate>>>,
}

impl MemoryProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, context_id: &str) -> Option<ProgressUpdate> {
        self.updates
            .lock()
            .get(context_id)
            .and_then(|list| list.last().cloned())
    }

    pub fn history(&self, context_id: &str) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .get(context_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Context ids that have received at least one update.
    pub fn contexts(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.updates.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ProgressSink for MemoryProgressSink {
    fn report(&self, context_id: &str, update: ProgressUpdate) {
        self.updates
            .lock()
            .entry(context_id.to_string())
            .or_default()
            .push(update);
    }
}
