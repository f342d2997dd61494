//! Per-session conversation state and its on-disk snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompt::LiteraryStyle;
use crate::world::Mission;

/// Maximum entries kept in `conversation_history` (20 turn pairs).
pub const CONVERSATION_HISTORY_CAP: usize = 40;

/// The in-memory state of one running session. Persisted as a compact
/// snapshot (`session_{id}.json`) after every successful action so a
/// restarted process can rehydrate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: String,
    pub file_id: String,
    pub player_name: String,
    pub literary_style: LiteraryStyle,
    pub game_state: GameStateMeta,
    /// Full narrative log shown to the player.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Model context: alternating user/assistant turns, bounded.
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default)]
    pub last_mission_turn: u64,
    #[serde(default)]
    pub missions: Vec<Mission>,
    #[serde(default)]
    pub completed_missions: Vec<Mission>,
    /// Set while an active story mission blocks the storyline.
    #[serde(default)]
    pub blocked_by_mission_id: Option<Uuid>,
}

/// Lightweight game-state header included in responses and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateMeta {
    pub current_location: String,
    pub is_initialized: bool,
    #[serde(default)]
    pub last_action: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One entry of the player-facing narrative log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    PlayerAction,
    Narration,
    Dialogue,
    Hint,
    System,
}

/// One turn of LLM context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ConversationState {
    pub fn new(
        session_id: impl Into<String>,
        file_id: impl Into<String>,
        player_name: impl Into<String>,
        literary_style: LiteraryStyle,
        starting_location: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            file_id: file_id.into(),
            player_name: player_name.into(),
            literary_style,
            game_state: GameStateMeta {
                current_location: starting_location.into(),
                is_initialized: false,
                last_action: None,
                created_at: Utc::now(),
            },
            history: Vec::new(),
            conversation_history: Vec::new(),
            turn_count: 0,
            last_mission_turn: 0,
            missions: Vec::new(),
            completed_missions: Vec::new(),
            blocked_by_mission_id: None,
        }
    }

    /// Append a narrative log entry stamped with the current time.
    pub fn push_history(&mut self, kind: HistoryKind, text: impl Into<String>) {
        self.history.push(HistoryEntry {
            kind,
            text: text.into(),
            ts: Utc::now(),
        });
    }

    /// Append a user turn to the model context, enforcing the cap.
    pub fn push_user_turn(&mut self, content: impl Into<String>) {
        self.push_turn(ChatRole::User, content.into());
    }

    /// Append an assistant turn to the model context, enforcing the cap.
    pub fn push_assistant_turn(&mut self, content: impl Into<String>) {
        self.push_turn(ChatRole::Assistant, content.into());
    }

    fn push_turn(&mut self, role: ChatRole, content: String) {
        self.conversation_history.push(ChatTurn { role, content });
        let overflow = self
            .conversation_history
            .len()
            .saturating_sub(CONVERSATION_HISTORY_CAP);
        if overflow > 0 {
            self.conversation_history.drain(..overflow);
        }
    }

    /// The mission currently blocking the storyline, if still active.
    pub fn blocking_mission(&self) -> Option<&Mission> {
        let id = self.blocked_by_mission_id?;
        self.missions
            .iter()
            .find(|m| m.id == id && m.is_blocking())
    }

    /// Find a mission by id across active and completed collections.
    pub fn find_mission(&self, id: Uuid) -> Option<&Mission> {
        self.missions
            .iter()
            .chain(self.completed_missions.iter())
            .find(|m| m.id == id)
    }

    /// Snapshot document name under the store's aux namespace.
    pub fn snapshot_name(session_id: &str) -> String {
        format!("session_{session_id}")
    }

    /// History document name under the store's aux namespace.
    pub fn history_name(session_id: &str) -> String {
        format!("history_{session_id}")
    }
}
