//! Prompt assembly for the narrator, mission generator and NPC chat.
//!
//! The system prompt is composed of stable sections in a fixed order so
//! the model sees a consistent frame every turn. The user prompt is the
//! player action verbatim.

mod style;

pub use style::LiteraryStyle;

use openai::Message;

use crate::session::{ChatRole, ConversationState};
use crate::world::{Mission, MissionStatus, Scene, WorldDocs};

/// Character budget for the lore background section.
const BACKGROUND_MAX_CHARS: usize = 600;

/// Token budget for conversation history included per request.
const HISTORY_TOKEN_BUDGET: usize = 2000;

/// The step grammar the narrator must reply in. Kept in one place so the
/// parser and the prompt can never drift apart silently.
const STEP_GRAMMAR: &str = "\
Reply ONLY with the following line markers, one per line:
[MISSION: true|false] — first line; true only when the story calls for a new mission.
[NARRATION: text] — narrative prose.
[DIALOGUE: characterId, \"text\"] — a character speaks.
[HINT: text] — a consequence summary, followed immediately by its CHANGE lines:
[CHANGE: 玩家, attributeName, +N|-N] — player attribute delta.
[CHANGE: RELATIONSHIP, npcName, +N|-N] — relationship delta (clamped to -100..100).
[CHANGE: itemName, 获得|丢失, N] — gain or lose N of an item.
[CHOICE: title] then description lines, then [OPTION: text] lines, then [END_CHOICE] —
offer the player 2 to 4 options. Do not write anything outside these markers.";

/// Directive appended on the first turn of a session.
const INIT_DIRECTIVE: &str = "\
[INIT] This is the opening turn. Establish the scene, introduce the player \
character in their starting location, and end with a choice of first actions.";

/// Rough token estimate (≈4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Build the full message list for one player action.
pub fn build_action_messages(
    world: &WorldDocs,
    state: &ConversationState,
    action: &str,
) -> Vec<Message> {
    let mut messages = vec![Message::system(build_system_prompt(world, state))];
    messages.extend(history_window(state));
    messages.push(Message::user(action));
    messages
}

/// The stable system prompt for narration turns.
pub fn build_system_prompt(world: &WorldDocs, state: &ConversationState) -> String {
    let mut sections = Vec::new();

    sections.push(
        "You are the narrator of an interactive fiction game. You drive the story \
         forward one beat per player action, keeping strict continuity with the \
         world state below."
            .to_string(),
    );

    let era = world
        .lore
        .current_era()
        .map(|e| format!(" Era: {} ({}–{}).", e.title, e.start_year, e.end_year))
        .unwrap_or_default();
    sections.push(format!(
        "Current game time: {}.{} Time period: {}.",
        world.lore.game_time.display(),
        era,
        world.lore.time_period
    ));

    sections.push(format!(
        "World background — {}: {}",
        world.lore.title,
        world.lore.background_summary(BACKGROUND_MAX_CHARS)
    ));

    sections.push(player_section(world));

    if let Some(scene) = world.scenes.get(&world.player.location) {
        sections.push(scene_section(&world.player.location, scene));
    }

    sections.push(format!(
        "Style: {}",
        state.literary_style.directive()
    ));

    sections.push(STEP_GRAMMAR.to_string());

    let active: Vec<&Mission> = state
        .missions
        .iter()
        .filter(|m| m.status == MissionStatus::Active)
        .collect();
    if !active.is_empty() {
        sections.push(missions_section(&active));
    }

    if !state.game_state.is_initialized {
        sections.push(INIT_DIRECTIVE.to_string());
    }

    sections.join("\n\n")
}

fn player_section(world: &WorldDocs) -> String {
    let player = &world.player;
    let attributes = player
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    let inventory = if player.inventory.is_empty() {
        "empty".to_string()
    } else {
        player
            .inventory
            .iter()
            .map(|i| format!("{} x{}", i.name, i.quantity))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Player: {} ({}, age {}). Attributes: {}. Currency: {}. Inventory: {}. \
         Location: {}. Unlocked scenes: {}.",
        player.profile.name,
        player.profile.gender,
        player.profile.age,
        attributes,
        player.currency,
        inventory,
        player.location,
        player.unlocked_scenes.join(", ")
    )
}

fn scene_section(scene_id: &str, scene: &Scene) -> String {
    let mut lines = vec![format!(
        "Current scene [{}] {}: {}",
        scene_id, scene.name, scene.description
    )];
    for npc in &scene.npcs {
        let job = npc.job.as_deref().unwrap_or("unknown occupation");
        let relationship = npc
            .relationship
            .map(|r| format!(", relationship {r}"))
            .unwrap_or_default();
        lines.push(format!(
            "- NPC [{}] {} ({job}{relationship}): {}",
            npc.id, npc.name, npc.description
        ));
    }
    for building in &scene.buildings {
        let features = building
            .features
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "- Building [{}] {} ({}): {}. Features: {}",
            building.id, building.name, building.building_type, building.description, features
        ));
    }
    lines.join("\n")
}

fn missions_section(missions: &[&Mission]) -> String {
    let mut lines = vec!["Active missions:".to_string()];
    for mission in missions {
        lines.push(format!("- {}: {}", mission.title, mission.description));
        for path in &mission.paths {
            lines.push(format!("  path \"{}\": {}", path.id, path.name));
        }
    }
    lines.join("\n")
}

/// The last turns of conversation history that fit the token budget.
fn history_window(state: &ConversationState) -> Vec<Message> {
    let mut budget = HISTORY_TOKEN_BUDGET;
    let mut window = Vec::new();
    for turn in state.conversation_history.iter().rev() {
        let cost = estimate_tokens(&turn.content);
        if cost > budget {
            break;
        }
        budget -= cost;
        window.push(match turn.role {
            ChatRole::User => Message::user(&turn.content),
            ChatRole::Assistant => Message::assistant(&turn.content),
        });
    }
    window.reverse();
    window
}

/// Build the mission generation prompt. The reply must be a single JSON
/// object; the mission engine strips markdown fences before parsing.
pub fn build_mission_messages(world: &WorldDocs, state: &ConversationState) -> Vec<Message> {
    let recent: Vec<&str> = state
        .history
        .iter()
        .rev()
        .take(6)
        .map(|h| h.text.as_str())
        .collect();

    let system = format!(
        "You design missions for an interactive fiction game. Respond with ONLY a \
         JSON object (no markdown, no commentary) of this shape:\n\
         {{\"type\": \"side\"|\"story\", \"title\": \"...\", \"description\": \"...\",\n \
          \"paths\": [{{\"id\": \"path_1\", \"name\": \"...\",\n   \
          \"requirements\": {{\"items\": [{{\"name\": \"...\", \"qty\": 1}}], \"currency\": 10,\n    \
          \"relationships\": [{{\"npc\": \"...\", \"minLevel\": 20}}], \"location\": \"sceneId\",\n    \
          \"flags\": {{}}}},\n   \
          \"rewards\": {{\"items\": [], \"currency\": 25, \"relationships\": \
          [{{\"npc\": \"...\", \"delta\": 5}}], \"flags\": {{}}}}}}]}}\n\
         Give 1 to 3 alternative paths. Use only scene ids, NPC names and item \
         names that exist in the world state.\n\n\
         World: {}. Player location: {}. Player attributes: {:?}. \
         Known NPCs: {}.",
        world.lore.title,
        world.player.location,
        world.player.attributes,
        world
            .scenes
            .scenes
            .values()
            .flat_map(|s| s.npcs.iter().map(|n| n.name.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let user = format!(
        "Recent story beats (newest first):\n{}\n\nDesign the next mission.",
        recent.join("\n")
    );

    vec![Message::system(system), Message::user(user)]
}

/// Build the NPC chat prompt: plain dialogue, no marker grammar.
pub fn build_npc_chat_messages(
    world: &WorldDocs,
    npc_name: &str,
    npc_description: &str,
    transcript: &[(ChatRole, String)],
    message: &str,
) -> Vec<Message> {
    let relationship = world
        .player
        .network
        .get(npc_name)
        .copied()
        .unwrap_or(0);
    let system = format!(
        "You are {npc_name}, a character in {}: {npc_description}. You are \
         talking with {} (relationship level {relationship} on a -100..100 \
         scale). Stay in character and answer with plain dialogue only — no \
         markers, no narration, no stage directions.",
        world.lore.title, world.player.profile.name
    );

    let mut messages = vec![Message::system(system)];
    for (role, content) in transcript {
        messages.push(match role {
            ChatRole::User => Message::user(content),
            ChatRole::Assistant => Message::assistant(content),
        });
    }
    messages.push(Message::user(message));
    messages
}
