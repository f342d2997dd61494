//! The mission engine: generation cadence, multi-path validation and
//! storyline blocking.
//!
//! Missions are generated by a dedicated model call that must reply with
//! a single JSON object. Validation checks every path's requirements
//! against current player state; the first fully-satisfied path (in
//! definition order) wins and its rewards are applied exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::prompt;
use crate::session::{ConversationState, NarrativeModel};
use crate::world::{Mission, MissionPath, MissionType, Player, SceneMap, WorldDocs};

/// A new mission is generated at least every this many turns.
pub const MISSION_CADENCE_TURNS: u64 = 5;

/// Generates and validates missions.
pub struct MissionEngine {
    model: Arc<dyn NarrativeModel>,
}

/// Outcome of validating one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResult {
    pub path_id: String,
    pub name: String,
    pub completed: bool,
    /// Satisfied requirements, phrased for the client.
    pub details: Vec<String>,
    pub missing_requirements: Vec<String>,
}

/// Synchronous storyline query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorylineStatus {
    pub blocked: bool,
    pub mission: Option<Mission>,
    pub has_active_story_mission: bool,
}

impl MissionEngine {
    pub fn new(model: Arc<dyn NarrativeModel>) -> Self {
        Self { model }
    }

    /// Whether this turn should generate a mission: the narrator asked
    /// for one, or the cadence elapsed — never while the storyline is
    /// blocked.
    pub fn should_generate(state: &ConversationState, mission_requested: bool) -> bool {
        if state.blocking_mission().is_some() {
            return false;
        }
        mission_requested
            || state.turn_count.saturating_sub(state.last_mission_turn) >= MISSION_CADENCE_TURNS
    }

    /// Generate a mission via the model. Failures degrade to warnings at
    /// the call site; they never fail the player action.
    pub async fn generate(&self, world: &WorldDocs, state: &ConversationState) -> Result<Mission> {
        let messages = prompt::build_mission_messages(world, state);
        let reply = self.model.complete(messages).await?;
        parse_mission_reply(&reply, state.turn_count)
    }

    /// Evaluate every path of a mission against current player state.
    pub fn evaluate(mission: &Mission, player: &Player) -> Vec<PathResult> {
        mission
            .paths
            .iter()
            .map(|path| evaluate_path(path, player))
            .collect()
    }

    /// The storyline query: a read of in-memory state only.
    pub fn storyline_status(state: &ConversationState) -> StorylineStatus {
        let mission = state.blocking_mission().cloned();
        let has_active_story_mission = state
            .missions
            .iter()
            .any(|m| m.mission_type == MissionType::Story && m.is_blocking());
        StorylineStatus {
            blocked: mission.is_some(),
            mission,
            has_active_story_mission,
        }
    }
}

/// Check one path; collects both satisfied and missing requirements.
pub fn evaluate_path(path: &MissionPath, player: &Player) -> PathResult {
    let mut details = Vec::new();
    let mut missing = Vec::new();
    let requirements = &path.requirements;

    for item in &requirements.items {
        let held = player.find_item(&item.name).map(|i| i.quantity).unwrap_or(0);
        if held >= item.qty {
            details.push(format!("has {} x{}", item.name, held));
        } else {
            missing.push(format!("needs {} x{} (has {held})", item.name, item.qty));
        }
    }

    if let Some(required) = requirements.currency {
        if player.currency >= required {
            details.push(format!("currency {} ≥ {required}", player.currency));
        } else {
            missing.push(format!(
                "needs currency {required} (has {})",
                player.currency
            ));
        }
    }

    for relationship in &requirements.relationships {
        let level = player
            .network
            .get(&relationship.npc)
            .copied()
            .unwrap_or(0);
        if level >= relationship.min_level {
            details.push(format!("{} relationship {level}", relationship.npc));
        } else {
            missing.push(format!(
                "needs {} relationship ≥ {} (has {level})",
                relationship.npc, relationship.min_level
            ));
        }
    }

    if let Some(location) = &requirements.location {
        if &player.location == location {
            details.push(format!("at {location}"));
        } else {
            missing.push(format!("must be at {location} (is at {})", player.location));
        }
    }

    for (key, expected) in &requirements.flags {
        if player.flags.get(key) == Some(expected) {
            details.push(format!("flag {key} set"));
        } else {
            missing.push(format!("needs flag {key} = {expected}"));
        }
    }

    PathResult {
        path_id: path.id.clone(),
        name: path.name.clone(),
        completed: missing.is_empty(),
        details,
        missing_requirements: missing,
    }
}

/// Apply a winning path's rewards: consume declared items, credit
/// currency, adjust relationships (mirrored into scenes), set flags.
///
/// Returns whether the scenes document was modified.
pub fn apply_rewards(path: &MissionPath, player: &mut Player, scenes: &mut SceneMap) -> bool {
    let rewards = &path.rewards;
    let mut scenes_changed = false;

    for item in &rewards.items {
        if let Some(existing) = player.find_item_mut(&item.name) {
            existing.quantity = existing.quantity.saturating_sub(item.qty);
        }
    }
    player.prune_empty_items();

    if let Some(delta) = rewards.currency {
        player.adjust_currency(delta);
    }

    for relationship in &rewards.relationships {
        let level = player.adjust_relationship(&relationship.npc, relationship.delta);
        if scenes.mirror_relationship(&relationship.npc, level) {
            scenes_changed = true;
        }
    }

    for (key, value) in &rewards.flags {
        player.flags.insert(key.clone(), value.clone());
    }

    scenes_changed
}

/// Wire shape of a generated mission reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MissionWire {
    #[serde(rename = "type")]
    mission_type: MissionType,
    title: String,
    description: String,
    #[serde(default)]
    paths: Vec<MissionPath>,
}

/// Parse the model's JSON reply into a mission, tolerating markdown
/// fences around the object.
pub fn parse_mission_reply(reply: &str, created_at_turn: u64) -> Result<Mission> {
    let cleaned = strip_json_fences(reply);
    let wire: MissionWire = serde_json::from_str(cleaned)?;

    let mut mission = Mission::new(
        wire.mission_type,
        wire.title,
        wire.description,
        created_at_turn,
    );
    mission.paths = wire.paths;
    for (index, path) in mission.paths.iter_mut().enumerate() {
        if path.id.trim().is_empty() {
            path.id = format!("path_{}", index + 1);
        }
    }
    Ok(mission)
}

/// Strip a ```json fenced block if the model wrapped its reply in one.
pub fn strip_json_fences(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
