// src/settings.rs

//! Runtime-toggleable settings read by executors at dispatch time.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::info;

/// Synchronous read access to the flags executors consult per task.
pub trait SettingsProvider: Send + Sync {
    /// Whether video tasks chain from the last frame of a prior video.
    fn flf2v_enabled(&self) -> bool;

    /// Base address of the generation backend, e.g. `http://127.0.0.1:8188`.
    fn backend_base_url(&self) -> String;
}

/// In-process settings that can be flipped while the scheduler runs.
#[derive(Debug)]
pub struct RuntimeSettings {
    flf2v_enabled: AtomicBool,
    backend_base_url: RwLock<String>,
}

impl RuntimeSettings {
    pub fn new(backend_base_url: impl Into<String>, flf2v_enabled: bool) -> Self {
        Self {
            flf2v_enabled: AtomicBool::new(flf2v_enabled),
            backend_base_url: RwLock::new(backend_base_url.into()),
        }
    }

    pub fn set_flf2v_enabled(&self, enabled: bool) {
        let previous = self.flf2v_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "last-frame chaining toggled");
        }
    }

    pub fn set_backend_base_url(&self, url: impl Into<String>) {
        let url = url.into();
        info!(url = %url, "backend base url changed");
        *self.backend_base_url.write() = url;
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8188", true)
    }
}

impl SettingsProvider for RuntimeSettings {
    fn flf2v_enabled(&self) -> bool {
        self.flf2v_enabled.load(Ordering::SeqCst)
    }

    fn backend_base_url(&self) -> String {
        self.backend_base_url.read().clone()
    }
}
