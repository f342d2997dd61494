//! Engine error types.

use thiserror::Error;

/// Errors reported by the engine core to callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A session, file, mission, scene or item does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A move targeted a scene the player has not unlocked.
    #[error("scene is locked: {scene_id}")]
    SceneLocked { scene_id: String },

    /// Era skip requested while already in the final era.
    #[error("already at the last era")]
    AlreadyAtLastEra,

    /// Submit/abandon on a mission that is not active.
    #[error("mission is not active: {mission_id}")]
    MissionNotActive { mission_id: String },

    /// Upstream model error, network error, or stream interruption.
    #[error("LLM failure: {0}")]
    Llm(#[from] openai::Error),

    /// A JSON document could not be written or read.
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),

    /// A persisted or generated document could not be (de)serialized.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background task cannot be resumed (e.g. source bytes lost).
    #[error("task recovery failure: {0}")]
    TaskRecovery(String),

    /// A caller violated the operation contract.
    #[error("validation failure: {0}")]
    Validation(String),
}

impl EngineError {
    /// Shorthand for a typed not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a contract violation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
