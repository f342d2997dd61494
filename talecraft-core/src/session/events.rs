//! The event vocabulary published to stream subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::GameStateMeta;
use crate::world::{Mission, Player};

/// Events produced by the session runtime for one session's subscribers.
///
/// For one `process_action` invocation the order is fixed:
/// `action_received → processing → response_chunk* | stream* →
/// state_update → action_options? → (new_mission|mission_completed)* →
/// complete`. Actions are serialized per session, so sequences of
/// different actions never interleave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GameEvent {
    Connected {
        session_id: String,
        ts: DateTime<Utc>,
    },
    ActionReceived {
        action: String,
    },
    Processing,
    /// Buffered mode: the final text re-sliced into fixed-width chunks.
    ResponseChunk {
        chunk: String,
        index: usize,
        total: usize,
    },
    /// Live mode: upstream tokens forwarded as they arrive.
    Stream {
        chunk: String,
    },
    StateUpdate {
        game_state: GameStateMeta,
        character_status: Player,
    },
    ActionOptions {
        options: Vec<String>,
    },
    NewMission {
        mission: Mission,
    },
    MissionCompleted {
        mission: Mission,
    },
    MissionAbandoned {
        mission: Mission,
        storyline_unblocked: bool,
    },
    Complete,
    Error {
        error: String,
    },
}

/// Non-blocking event publication, implemented by the stream hub.
///
/// `publish` must never block the session runtime; implementations drop
/// events when a subscriber cannot keep up.
pub trait EventSink: Send + Sync {
    fn publish(&self, session_id: &str, event: GameEvent);
}

/// A sink that discards everything; used when no delivery layer exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _session_id: &str, _event: GameEvent) {}
}
