//! Talecraft runtime: the delivery, image and background-task layers
//! around the engine core.
//!
//! - [`hub::StreamHub`] — per-session server-push subscribers (SSE
//!   framing, heartbeats, non-blocking fan-out)
//! - [`images::ImagePipeline`] — bounded-parallel world image synthesis
//! - [`tasks::TaskManager`] — crash-safe resumable document ingestion
//! - [`config::RuntimeConfig`] — file + environment configuration
//!
//! [`Engine`] wires everything together as explicit dependencies; the
//! HTTP layer of the hosting service holds one `Engine` and routes
//! requests into it.

pub mod config;
pub mod hub;
pub mod images;
pub mod tasks;
#[cfg(test)]
pub(crate) mod test_util;

pub use config::{init_tracing, RuntimeConfig};
pub use hub::{StreamHub, Subscription};
pub use images::{ImageOptions, ImagePipeline, ImageReport, ImageSource, OpenAiImageSource};
pub use tasks::{IngestBackend, IngestDeps, IngestOptions, TaskManager, TaskRecord, TaskState};

use std::sync::Arc;

use openai::OpenAi;
use talecraft_core::{GameStore, OpenAiModel, Result, SessionManager};

use tasks::WorldExtractor;

/// The assembled runtime: every component once, injected explicitly.
pub struct Engine {
    pub sessions: Arc<SessionManager>,
    pub hub: Arc<StreamHub>,
    pub images: Arc<ImagePipeline>,
    pub tasks: Arc<TaskManager>,
    pub store: GameStore,
}

impl Engine {
    /// Build the runtime from configuration. The API key comes from the
    /// environment; the ingest backend is the hosting service's
    /// implementation of the external collaborators.
    pub fn from_config(
        config: &RuntimeConfig,
        backend: Arc<dyn IngestBackend>,
    ) -> Result<Self> {
        let client = OpenAi::from_env()?
            .with_timeout(config.request_timeout())
            .with_max_retries(config.max_retries);
        let model = Arc::new(OpenAiModel::new(client.clone(), config.model.clone()));

        let store = GameStore::new(&config.data_dir);
        let hub = Arc::new(StreamHub::with_heartbeat(config.heartbeat()));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            model.clone(),
            hub.clone(),
        ));
        let images = Arc::new(ImagePipeline::new(
            Arc::new(OpenAiImageSource::new(client)),
            store.clone(),
        ));
        let tasks = Arc::new(TaskManager::new(
            config.data_dir.join("tasks"),
            IngestDeps {
                backend,
                extractor: WorldExtractor::new(model),
                store: store.clone(),
                images: Some(images.clone()),
            },
        ));

        Ok(Self {
            sessions,
            hub,
            images,
            tasks,
            store,
        })
    }
}
