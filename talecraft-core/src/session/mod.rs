//! The session runtime: per-session state machine driving
//! prompt → model → parser → status engine → persistence, with events
//! published to the delivery layer at each stage.
//!
//! Every session is guarded by its own `RwLock`; all mutating operations
//! take the write lock for their full duration, so actions on one
//! session are strictly serialized while different sessions run in
//! parallel. Reads (`get`, `storyline_status`) take the read lock and
//! see a consistent snapshot.

mod events;
mod model;
mod state;
#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

pub use events::{EventSink, GameEvent, NullSink};
pub use model::{ModelOptions, NarrativeModel, OpenAiModel};
pub use state::{
    ChatRole, ChatTurn, ConversationState, GameStateMeta, HistoryEntry, HistoryKind,
    CONVERSATION_HISTORY_CAP,
};

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::mission::{self, MissionEngine, PathResult, StorylineStatus};
use crate::parser::{self, Step};
use crate::prompt::{self, LiteraryStyle};
use crate::status::StatusEngine;
use crate::store::{DocKind, GameStore};
use crate::world::{Mission, MissionStatus, MissionType, Player, Scene, WorldDocs};

/// Game time advanced per player action.
pub const GAME_HOURS_PER_ACTION: u32 = 1;

/// Width of simulated chunks in buffered mode.
const BUFFERED_CHUNK_CHARS: usize = 80;

/// Synthesized action used to resume a storyline after a blocking
/// mission resolves.
const CONTINUATION_ACTION: &str = "the story continues";

/// Entries kept per NPC chat transcript.
const NPC_CHAT_CAP: usize = 60;

/// How chunks reach the subscriber during an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    /// Complete upstream, then re-slice the text into `response_chunk`s.
    Buffered,
    /// Forward upstream tokens as `stream` events as they arrive.
    Live,
}

/// Snapshot returned by `create` and `get_session_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub conversation: ConversationState,
    pub character_status: Player,
}

/// The result of one processed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub response: String,
    pub steps: Vec<Step>,
    pub action_options: Vec<String>,
    pub game_state: GameStateMeta,
    pub character_status: Player,
    pub missions: Vec<Mission>,
    #[serde(default)]
    pub new_mission: Option<Mission>,
    #[serde(default)]
    pub completed_missions: Vec<Mission>,
    /// Degraded subsystem failures (mission tick, history log).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// True when the action was answered by the blocking narrative.
    #[serde(default)]
    pub storyline_blocked: bool,
}

/// Result of a scene change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneChangeReport {
    pub previous_location: String,
    pub current_location: String,
    pub scene: Scene,
}

/// Structured diff returned by `skip_to_next_era`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraSkipReport {
    pub previous_era: String,
    pub current_era: String,
    pub time_change: TimeChange,
    pub player_changes: EraPlayerChanges,
    pub narrative: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeChange {
    pub years_passed: i64,
    pub new_year: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraPlayerChanges {
    pub age_delta: i64,
    pub stat_changes: std::collections::BTreeMap<String, i64>,
    pub currency_bonus: i64,
}

/// One NPC chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpcChatReply {
    pub npc_id: String,
    pub npc_name: String,
    pub reply: String,
}

/// Result of a mission submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReport {
    pub completed: bool,
    pub completed_path: Option<String>,
    pub path_results: Vec<PathResult>,
    pub mission: Mission,
    /// Storyline continuation, present when completing a blocking mission.
    #[serde(default)]
    pub continuation: Option<ActionOutcome>,
}

/// Result of abandoning a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonReport {
    pub mission: Mission,
    pub storyline_unblocked: bool,
    #[serde(default)]
    pub continuation: Option<ActionOutcome>,
}

type SessionHandle = Arc<RwLock<ConversationState>>;

/// Owns all live sessions and drives the action pipeline.
pub struct SessionManager {
    store: GameStore,
    model: Arc<dyn NarrativeModel>,
    events: Arc<dyn EventSink>,
    missions: MissionEngine,
    status: StatusEngine,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(
        store: GameStore,
        model: Arc<dyn NarrativeModel>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            missions: MissionEngine::new(Arc::clone(&model)),
            model,
            events,
            status: StatusEngine::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    /// Create a session from a world template.
    pub async fn create(
        &self,
        session_id: &str,
        file_id: &str,
        player_name: Option<String>,
        literary_style: Option<LiteraryStyle>,
    ) -> Result<SessionSnapshot> {
        if !self.store.exists_template(file_id).await {
            return Err(EngineError::not_found("file", file_id));
        }

        let mut world = self
            .store
            .materialize_session_from_template(session_id, file_id)
            .await?;

        if let Some(name) = &player_name {
            world.player.profile.name = name.clone();
            self.store
                .save_session(DocKind::Player, session_id, &world.player)
                .await?;
        }

        let state = ConversationState::new(
            session_id,
            file_id,
            world.player.profile.name.clone(),
            literary_style.unwrap_or_default(),
            world.player.location.clone(),
        );
        self.persist_snapshot(&state).await?;

        let handle: SessionHandle = Arc::new(RwLock::new(state.clone()));
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), handle);

        Ok(SessionSnapshot {
            conversation: state,
            character_status: world.player,
        })
    }

    /// The in-memory state for a session, if one is live.
    pub async fn get(&self, session_id: &str) -> Option<ConversationState> {
        let handle = self.sessions.lock().await.get(session_id).cloned()?;
        let state = handle.read().await;
        Some(state.clone())
    }

    /// Rehydrate a session from its on-disk snapshot.
    pub async fn recover_session(&self, session_id: &str) -> Result<Option<ConversationState>> {
        if let Some(state) = self.get(session_id).await {
            return Ok(Some(state));
        }
        let Some(state) = self
            .store
            .load_aux::<ConversationState>(&ConversationState::snapshot_name(session_id))
            .await?
        else {
            return Ok(None);
        };
        let handle: SessionHandle = Arc::new(RwLock::new(state.clone()));
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), handle);
        Ok(Some(state))
    }

    /// Read-only snapshot for reconnecting clients.
    pub async fn get_session_state(&self, session_id: &str) -> Result<SessionSnapshot> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await.clone();
        let player = self
            .store
            .load_session(DocKind::Player, session_id, &state.file_id)
            .await?;
        Ok(SessionSnapshot {
            conversation: state,
            character_status: player,
        })
    }

    /// Storyline-blocking query; takes only the read lock.
    pub async fn storyline_status(&self, session_id: &str) -> Result<StorylineStatus> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        Ok(MissionEngine::storyline_status(&state))
    }

    /// Drop a session from memory; the on-disk snapshot remains.
    pub async fn close(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    /// Process one player action. Serialized per session.
    pub async fn process_action(
        &self,
        session_id: &str,
        action: &str,
        mode: ProcessMode,
    ) -> Result<ActionOutcome> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;
        self.run_action(&mut state, action, mode, false).await
    }

    /// Use an inventory item: synthesizes a player action and submits it
    /// through the normal pipeline. The inventory decrement comes from
    /// whatever item delta the narrator emits, not from the use itself.
    pub async fn use_item(
        &self,
        session_id: &str,
        item_id: &str,
        mode: ProcessMode,
    ) -> Result<ActionOutcome> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;
        let player: Player = self
            .store
            .load_session(DocKind::Player, session_id, &state.file_id)
            .await?;
        let item = player
            .find_item_by_id(item_id)
            .ok_or_else(|| EngineError::not_found("item", item_id))?;
        let action = format!("我使用了{}", item.name);
        self.run_action(&mut state, &action, mode, false).await
    }

    /// Move the player to an unlocked scene.
    pub async fn change_scene(
        &self,
        session_id: &str,
        scene_id: &str,
    ) -> Result<SceneChangeReport> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let mut world = self.store.load_world(session_id, &state.file_id).await?;
        let scene = world
            .scenes
            .get(scene_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("scene", scene_id))?;
        if !world.player.has_unlocked(scene_id) {
            return Err(EngineError::SceneLocked {
                scene_id: scene_id.to_string(),
            });
        }

        let previous = world.player.location.clone();
        world.player.move_to(scene_id);
        self.store
            .save_session(DocKind::Player, session_id, &world.player)
            .await?;

        state.game_state.current_location = scene_id.to_string();
        state.push_history(
            HistoryKind::System,
            format!("Scene changed: {previous} → {scene_id}"),
        );
        self.persist_snapshot(&state).await?;

        self.events.publish(
            &state.session_id,
            GameEvent::StateUpdate {
                game_state: state.game_state.clone(),
                character_status: world.player,
            },
        );

        Ok(SceneChangeReport {
            previous_location: previous,
            current_location: scene_id.to_string(),
            scene,
        })
    }

    /// Advance to the next era, applying age, stat growth and currency
    /// bonuses. The only coarse-grained time advancement in the engine.
    pub async fn skip_to_next_era(&self, session_id: &str) -> Result<EraSkipReport> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let mut world = self.store.load_world(session_id, &state.file_id).await?;
        if world.lore.at_last_era() {
            return Err(EngineError::AlreadyAtLastEra);
        }
        let previous = world
            .lore
            .current_era()
            .map(|e| e.title.clone())
            .unwrap_or_default();
        let next = world
            .lore
            .next_era()
            .cloned()
            .ok_or(EngineError::AlreadyAtLastEra)?;

        let years_passed = (next.start_year - world.lore.game_time.year).max(0);
        world.lore.game_time = crate::world::GameTime::new(next.start_year);
        world.lore.current_era_index += 1;

        world.player.profile.age = (i64::from(world.player.profile.age) + years_passed)
            .max(0) as u32;
        let mut stat_changes = std::collections::BTreeMap::new();
        for (name, delta) in &next.stats_growth {
            let new_value = world.player.adjust_attribute(name, *delta);
            stat_changes.insert(name.clone(), new_value);
        }
        let currency_bonus = next.currency_bonus.unwrap_or(0);
        if currency_bonus != 0 {
            world.player.adjust_currency(currency_bonus);
        }
        world.player.last_updated = chrono::Utc::now();

        self.store
            .save_session(DocKind::Lore, session_id, &world.lore)
            .await?;
        self.store
            .save_session(DocKind::Player, session_id, &world.player)
            .await?;

        let narrative = format!(
            "{years_passed} years pass. The {previous} gives way to the {}.",
            next.title
        );
        state.push_history(HistoryKind::System, narrative.clone());
        self.persist_snapshot(&state).await?;

        Ok(EraSkipReport {
            previous_era: previous,
            current_era: next.title.clone(),
            time_change: TimeChange {
                years_passed,
                new_year: next.start_year,
            },
            player_changes: EraPlayerChanges {
                age_delta: years_passed,
                stat_changes,
                currency_bonus,
            },
            narrative,
        })
    }

    /// Talk to an NPC out of band; keeps a bounded per-NPC transcript.
    pub async fn npc_chat(
        &self,
        session_id: &str,
        npc_id: &str,
        message: &str,
    ) -> Result<NpcChatReply> {
        let handle = self.handle(session_id).await?;
        // Write lock: the transcript document is the mutable resource.
        let state = handle.write().await;

        let world = self.store.load_world(session_id, &state.file_id).await?;
        let (_, npc) = world
            .scenes
            .find_npc(npc_id)
            .ok_or_else(|| EngineError::not_found("npc", npc_id))?;
        let npc_name = npc.name.clone();
        let npc_description = npc.description.clone();

        let transcript_name = format!("npc_chat_{session_id}_{npc_id}");
        let mut transcript: Vec<ChatTurn> = self
            .store
            .load_aux(&transcript_name)
            .await?
            .unwrap_or_default();

        let turns: Vec<(ChatRole, String)> = transcript
            .iter()
            .map(|t| (t.role, t.content.clone()))
            .collect();
        let messages =
            prompt::build_npc_chat_messages(&world, &npc_name, &npc_description, &turns, message);
        let reply = self.model.complete(messages).await.map_err(|e| {
            self.events.publish(
                session_id,
                GameEvent::Error {
                    error: e.to_string(),
                },
            );
            e
        })?;

        transcript.push(ChatTurn {
            role: ChatRole::User,
            content: message.to_string(),
        });
        transcript.push(ChatTurn {
            role: ChatRole::Assistant,
            content: reply.clone(),
        });
        let overflow = transcript.len().saturating_sub(NPC_CHAT_CAP);
        if overflow > 0 {
            transcript.drain(..overflow);
        }
        self.store.save_aux(&transcript_name, &transcript).await?;

        Ok(NpcChatReply {
            npc_id: npc_id.to_string(),
            npc_name,
            reply,
        })
    }

    /// Submit a mission for validation. Idempotent after first success.
    pub async fn submit_mission(
        &self,
        session_id: &str,
        mission_id: Uuid,
        mode: ProcessMode,
    ) -> Result<SubmitReport> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let mut world = self.store.load_world(session_id, &state.file_id).await?;

        // Re-submitting a completed mission reports the original result
        // and applies nothing.
        if let Some(done) = state
            .completed_missions
            .iter()
            .find(|m| m.id == mission_id)
            .cloned()
        {
            return Ok(SubmitReport {
                completed: true,
                completed_path: done.completed_path_id.clone(),
                path_results: MissionEngine::evaluate(&done, &world.player),
                mission: done,
                continuation: None,
            });
        }

        let position = state
            .missions
            .iter()
            .position(|m| m.id == mission_id)
            .ok_or_else(|| EngineError::not_found("mission", mission_id.to_string()))?;
        if state.missions[position].status != MissionStatus::Active {
            return Err(EngineError::MissionNotActive {
                mission_id: mission_id.to_string(),
            });
        }

        let path_results = MissionEngine::evaluate(&state.missions[position], &world.player);
        let Some(winner) = path_results.iter().find(|r| r.completed).cloned() else {
            return Ok(SubmitReport {
                completed: false,
                completed_path: None,
                path_results,
                mission: state.missions[position].clone(),
                continuation: None,
            });
        };

        let mut mission = state.missions.remove(position);
        let winning_path = mission
            .paths
            .iter()
            .find(|p| p.id == winner.path_id)
            .cloned();
        let mut scenes_changed = false;
        if let Some(path) = &winning_path {
            scenes_changed = mission::apply_rewards(path, &mut world.player, &mut world.scenes);
        }
        world.player.last_updated = chrono::Utc::now();
        mission.status = MissionStatus::Completed;
        mission.completed_path_id = Some(winner.path_id.clone());

        let was_blocking = state.blocked_by_mission_id == Some(mission.id)
            && mission.mission_type == MissionType::Story;
        if was_blocking {
            state.blocked_by_mission_id = None;
        }
        state.completed_missions.push(mission.clone());

        self.store
            .save_session(DocKind::Player, session_id, &world.player)
            .await?;
        if scenes_changed {
            self.store
                .save_session(DocKind::Scenes, session_id, &world.scenes)
                .await?;
        }
        self.persist_snapshot(&state).await?;

        self.events.publish(
            session_id,
            GameEvent::MissionCompleted {
                mission: mission.clone(),
            },
        );

        // Resume the storyline with a synthesized beat when the completed
        // mission was the blocker.
        let continuation = if was_blocking {
            match self
                .run_action(&mut state, CONTINUATION_ACTION, mode, true)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "storyline continuation after mission completion failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(SubmitReport {
            completed: true,
            completed_path: Some(winner.path_id),
            path_results,
            mission,
            continuation,
        })
    }

    /// Abandon an active mission; unblocks and resumes the storyline if
    /// it was the blocking story mission.
    pub async fn abandon_mission(
        &self,
        session_id: &str,
        mission_id: Uuid,
        mode: ProcessMode,
    ) -> Result<AbandonReport> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let position = state
            .missions
            .iter()
            .position(|m| m.id == mission_id)
            .ok_or_else(|| EngineError::not_found("mission", mission_id.to_string()))?;
        if state.missions[position].status != MissionStatus::Active {
            return Err(EngineError::MissionNotActive {
                mission_id: mission_id.to_string(),
            });
        }

        let storyline_unblocked = state.blocked_by_mission_id == Some(mission_id);
        state.missions[position].status = MissionStatus::Abandoned;
        let mission = state.missions[position].clone();
        if storyline_unblocked {
            state.blocked_by_mission_id = None;
        }
        self.persist_snapshot(&state).await?;

        self.events.publish(
            session_id,
            GameEvent::MissionAbandoned {
                mission: mission.clone(),
                storyline_unblocked,
            },
        );

        let continuation = if storyline_unblocked {
            match self
                .run_action(&mut state, CONTINUATION_ACTION, mode, true)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "storyline continuation after abandonment failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(AbandonReport {
            mission,
            storyline_unblocked,
            continuation,
        })
    }

    /// Get (or recover) the handle for a session.
    async fn handle(&self, session_id: &str) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.lock().await.get(session_id).cloned() {
            return Ok(handle);
        }
        self.recover_session(session_id).await?;
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    /// The ten-step action pipeline. Caller holds the session write lock.
    async fn run_action(
        &self,
        state: &mut ConversationState,
        action: &str,
        mode: ProcessMode,
        bypass_block: bool,
    ) -> Result<ActionOutcome> {
        let session_id = state.session_id.clone();
        self.events.publish(
            &session_id,
            GameEvent::ActionReceived {
                action: action.to_string(),
            },
        );
        self.events.publish(&session_id, GameEvent::Processing);

        // Storyline block: answer with the canned narrative, no model call.
        if !bypass_block {
            if let Some(blocking) = state.blocking_mission().cloned() {
                return self.answer_blocked(state, action, &blocking).await;
            }
        }

        // Everything up to the final snapshot write operates on a checkpoint
        // so any failure leaves memory exactly as it was.
        let checkpoint = state.clone();

        state.push_history(HistoryKind::PlayerAction, action);
        state.push_user_turn(action);

        let result = self.drive_model(state, action, mode).await;
        let (text, mut world) = match result {
            Ok(pair) => pair,
            Err(e) => {
                *state = checkpoint;
                self.publish_error(&session_id, &e);
                return Err(e);
            }
        };

        let parsed = parser::parse(&text);
        let apply = self
            .status
            .apply(&mut world.player, &mut world.scenes, &world.items, &parsed.deltas);
        world.lore.game_time.advance_hours(GAME_HOURS_PER_ACTION);

        state.game_state.is_initialized = true;
        state.game_state.last_action = Some(action.to_string());
        state.game_state.current_location = world.player.location.clone();
        state.push_assistant_turn(&text);
        for step in &parsed.steps {
            let (kind, entry) = step_history_entry(step);
            state.push_history(kind, entry);
        }
        state.turn_count += 1;

        let mut warnings = Vec::new();
        let mut new_mission = None;
        if MissionEngine::should_generate(state, parsed.mission_requested) {
            match self.missions.generate(&world, state).await {
                Ok(mission) => {
                    state.last_mission_turn = state.turn_count;
                    if mission.mission_type == MissionType::Story {
                        state.blocked_by_mission_id = Some(mission.id);
                    }
                    state.missions.push(mission.clone());
                    new_mission = Some(mission);
                }
                Err(e) => {
                    warn!(error = %e, session = %session_id, "mission generation failed");
                    warnings.push(format!("mission generation failed: {e}"));
                }
            }
        }

        // Persist world documents, then the conversation snapshot. A failed
        // write rolls the in-memory state back and fails the action.
        let persisted = self.persist_world(&session_id, &world, apply.scenes_changed).await;
        let persisted = match persisted {
            Ok(()) => self.persist_snapshot(state).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            *state = checkpoint;
            self.publish_error(&session_id, &e);
            return Err(e);
        }
        if let Err(e) = self
            .store
            .save_aux(&ConversationState::history_name(&session_id), &state.history)
            .await
        {
            warn!(error = %e, "narrative history log write failed");
            warnings.push("history log write failed".to_string());
        }

        self.events.publish(
            &session_id,
            GameEvent::StateUpdate {
                game_state: state.game_state.clone(),
                character_status: world.player.clone(),
            },
        );
        if !parsed.options.is_empty() {
            self.events.publish(
                &session_id,
                GameEvent::ActionOptions {
                    options: parsed.options.clone(),
                },
            );
        }
        if let Some(mission) = &new_mission {
            self.events.publish(
                &session_id,
                GameEvent::NewMission {
                    mission: mission.clone(),
                },
            );
        }
        self.events.publish(&session_id, GameEvent::Complete);

        Ok(ActionOutcome {
            response: text,
            steps: parsed.steps,
            action_options: parsed.options,
            game_state: state.game_state.clone(),
            character_status: world.player,
            missions: state.missions.clone(),
            new_mission,
            completed_missions: Vec::new(),
            warnings,
            storyline_blocked: false,
        })
    }

    /// Invoke the model and emit chunk events; returns the full text and
    /// the world documents loaded for the prompt.
    async fn drive_model(
        &self,
        state: &ConversationState,
        action: &str,
        mode: ProcessMode,
    ) -> Result<(String, WorldDocs)> {
        let session_id = &state.session_id;
        let world = self
            .store
            .load_world(session_id, &state.file_id)
            .await?;
        let messages = prompt::build_action_messages(&world, state, action);

        let text = match mode {
            ProcessMode::Buffered => {
                let text = self.model.complete(messages).await?;
                let chunks = slice_chunks(&text, BUFFERED_CHUNK_CHARS);
                let total = chunks.len();
                for (index, chunk) in chunks.into_iter().enumerate() {
                    self.events.publish(
                        session_id,
                        GameEvent::ResponseChunk {
                            chunk,
                            index,
                            total,
                        },
                    );
                }
                text
            }
            ProcessMode::Live => {
                let mut stream = self.model.stream(messages).await?;
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    text.push_str(&chunk);
                    self.events
                        .publish(session_id, GameEvent::Stream { chunk });
                }
                text
            }
        };
        Ok((text, world))
    }

    /// Answer an action with the canned blocking narrative.
    async fn answer_blocked(
        &self,
        state: &mut ConversationState,
        action: &str,
        blocking: &Mission,
    ) -> Result<ActionOutcome> {
        let session_id = state.session_id.clone();
        let narrative = format!(
            "A story mission is underway: {}. {} Complete or abandon it before \
             the story can continue.",
            blocking.title, blocking.description
        );

        let checkpoint = state.clone();
        state.push_history(HistoryKind::PlayerAction, action);
        state.push_history(HistoryKind::Narration, narrative.clone());
        if let Err(e) = self.persist_snapshot(state).await {
            *state = checkpoint;
            self.publish_error(&session_id, &e);
            return Err(e);
        }

        let player: Player = self
            .store
            .load_session(DocKind::Player, &session_id, &state.file_id)
            .await?;

        self.events.publish(
            &session_id,
            GameEvent::ResponseChunk {
                chunk: narrative.clone(),
                index: 0,
                total: 1,
            },
        );
        self.events.publish(
            &session_id,
            GameEvent::StateUpdate {
                game_state: state.game_state.clone(),
                character_status: player.clone(),
            },
        );
        self.events.publish(&session_id, GameEvent::Complete);

        Ok(ActionOutcome {
            response: narrative.clone(),
            steps: vec![Step::Narration { text: narrative }],
            action_options: Vec::new(),
            game_state: state.game_state.clone(),
            character_status: player,
            missions: state.missions.clone(),
            new_mission: None,
            completed_missions: Vec::new(),
            warnings: Vec::new(),
            storyline_blocked: true,
        })
    }

    async fn persist_world(
        &self,
        session_id: &str,
        world: &WorldDocs,
        scenes_changed: bool,
    ) -> Result<()> {
        self.store
            .save_session(DocKind::Player, session_id, &world.player)
            .await?;
        if scenes_changed {
            self.store
                .save_session(DocKind::Scenes, session_id, &world.scenes)
                .await?;
        }
        self.store
            .save_session(DocKind::Lore, session_id, &world.lore)
            .await?;
        Ok(())
    }

    async fn persist_snapshot(&self, state: &ConversationState) -> Result<()> {
        self.store
            .save_aux(&ConversationState::snapshot_name(&state.session_id), state)
            .await
    }

    fn publish_error(&self, session_id: &str, error: &EngineError) {
        self.events.publish(
            session_id,
            GameEvent::Error {
                error: error.to_string(),
            },
        );
    }
}

/// Narrative-log form of a parsed step.
fn step_history_entry(step: &Step) -> (HistoryKind, String) {
    match step {
        Step::Narration { text } => (HistoryKind::Narration, text.clone()),
        Step::Dialogue { character_id, text } => {
            (HistoryKind::Dialogue, format!("{character_id}: {text}"))
        }
        Step::Hint { text, .. } => (HistoryKind::Hint, text.clone()),
        Step::Choice { title, .. } => (HistoryKind::Narration, title.clone()),
    }
}

/// Split text into fixed-width chunks on char boundaries.
fn slice_chunks(text: &str, width: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
