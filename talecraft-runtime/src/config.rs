//! Runtime configuration: a JSON file with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use talecraft_core::ModelOptions;

/// Configuration for the whole runtime. Loaded from `config.json` when
/// present, otherwise defaulted; a few fields honor environment
/// variables so deployments can override without editing files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Root directory for game data, images and tasks.
    pub data_dir: PathBuf,
    /// Narrator model options.
    pub model: ModelOptions,
    /// Per-call timeout for non-streaming model requests, seconds.
    pub request_timeout_secs: u64,
    /// Attempts for image generation.
    pub max_retries: u32,
    /// Stream hub heartbeat cadence, seconds.
    pub heartbeat_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            model: ModelOptions::default(),
            request_timeout_secs: 30,
            max_retries: 3,
            heartbeat_secs: 30,
        }
    }
}

impl RuntimeConfig {
    /// Load from a JSON file; missing file means defaults. A malformed
    /// file is reported and replaced by defaults rather than aborting.
    pub fn load(path: &Path) -> Self {
        let config = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed config, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Apply environment overrides (`TALECRAFT_DATA_DIR`,
    /// `TALECRAFT_MODEL`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("TALECRAFT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(model) = std::env::var("TALECRAFT_MODEL") {
            self.model.model = model;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
