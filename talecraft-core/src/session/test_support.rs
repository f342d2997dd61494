//! Shared fixtures for engine tests: a small world, scripted narrator
//! backends and a collecting event sink.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use openai::Message;

use crate::error::{EngineError, Result};
use crate::prompt::LiteraryStyle;
use crate::session::{
    ConversationState, EventSink, GameEvent, NarrativeModel, SessionManager,
};
use crate::store::{DocKind, GameStore};
use crate::world::{
    Era, GameTime, InventoryItem, ItemCatalog, ItemTemplate, Lore, Player, PlayerProfile,
    SceneMap, WorldDocs,
};

pub(crate) fn test_player() -> Player {
    Player {
        profile: PlayerProfile {
            name: "Alice".to_string(),
            age: 20,
            gender: "female".to_string(),
        },
        attributes: BTreeMap::from([("strength".to_string(), 10), ("stamina".to_string(), 8)]),
        attribute_caps: BTreeMap::from([("strength".to_string(), 20)]),
        inventory: vec![InventoryItem {
            id: "gold".to_string(),
            name: "Gold".to_string(),
            description: "Shiny.".to_string(),
            quantity: 3,
            value: 1,
        }],
        currency: 100,
        location: "village".to_string(),
        unlocked_scenes: vec!["village".to_string()],
        network: BTreeMap::from([("Bob".to_string(), 95)]),
        flags: BTreeMap::new(),
        last_updated: Utc::now(),
    }
}

pub(crate) fn test_world() -> WorldDocs {
    let scenes: SceneMap = serde_json::from_value(serde_json::json!({
        "village": {
            "name": "Village",
            "description": "A quiet village.",
            "npcs": [{
                "id": "npc_bob", "name": "Bob", "age": 40, "gender": "male",
                "job": "blacksmith", "description": "A burly smith.",
                "relationship": 95
            }],
            "buildings": [{
                "id": "bld_forge", "name": "Forge", "type": "workshop",
                "description": "Sparks fly here.",
                "features": [{"id": "f_anvil", "name": "Anvil", "description": "Well worn."}]
            }]
        },
        "forest": {
            "name": "Forest",
            "description": "Dark and deep.",
            "npcs": [],
            "buildings": []
        }
    }))
    .unwrap();

    let mut items = BTreeMap::new();
    items.insert(
        "healing_potion".to_string(),
        ItemTemplate {
            name: "Healing Potion".to_string(),
            description: "Restores vigor.".to_string(),
            effects: None,
            value: 25,
        },
    );

    WorldDocs {
        lore: Lore {
            title: "The Shattered Realm".to_string(),
            background: vec!["An old kingdom clings to its hills.".to_string()],
            time_period: "medieval".to_string(),
            events: Vec::new(),
            game_time: GameTime::new(100),
            eras: vec![
                Era {
                    title: "Age of Ash".to_string(),
                    start_year: 100,
                    end_year: 120,
                    description: String::new(),
                    stats_growth: BTreeMap::new(),
                    currency_bonus: None,
                },
                Era {
                    title: "Age of Iron".to_string(),
                    start_year: 120,
                    end_year: 160,
                    description: String::new(),
                    stats_growth: BTreeMap::from([("strength".to_string(), 5)]),
                    currency_bonus: Some(50),
                },
            ],
            current_era_index: 0,
        },
        player: test_player(),
        items: ItemCatalog { items },
        scenes,
    }
}

pub(crate) fn test_state() -> ConversationState {
    ConversationState::new("s1", "f1", "Alice", LiteraryStyle::Literary, "village")
}

/// A narrator that replays scripted replies in order. When the script is
/// exhausted it falls back to a plain narration line.
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "[NARRATION: Nothing happens.]".to_string())
    }
}

#[async_trait]
impl NarrativeModel for ScriptedModel {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        Ok(self.next_reply())
    }

    async fn stream(&self, _messages: Vec<Message>) -> Result<BoxStream<'static, Result<String>>> {
        let reply = self.next_reply();
        // Split into two chunks to exercise accumulation.
        let mid = reply.len() / 2;
        let mid = (0..=mid)
            .rev()
            .find(|i| reply.is_char_boundary(*i))
            .unwrap_or(0);
        let parts = vec![Ok(reply[..mid].to_string()), Ok(reply[mid..].to_string())];
        Ok(futures::stream::iter(parts).boxed())
    }
}

/// A narrator that always fails, for error-path tests.
pub(crate) struct FailingModel;

#[async_trait]
impl NarrativeModel for FailingModel {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        Err(EngineError::Llm(openai::Error::EmptyResponse))
    }

    async fn stream(&self, _messages: Vec<Message>) -> Result<BoxStream<'static, Result<String>>> {
        Err(EngineError::Llm(openai::Error::EmptyResponse))
    }
}

/// Collects every published event for assertions on ordering.
#[derive(Default)]
pub(crate) struct CollectingSink {
    pub events: Mutex<Vec<(String, GameEvent)>>,
}

impl CollectingSink {
    pub fn types_for(&self, session_id: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == session_id)
            .map(|(_, e)| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, session_id: &str, event: GameEvent) {
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event));
    }
}

/// A manager over a temp store seeded with the test world as template
/// `f1`, a scripted narrator and a collecting sink.
pub(crate) async fn manager_with<I, S>(
    replies: I,
) -> (tempfile::TempDir, SessionManager, Arc<CollectingSink>)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    manager_with_model(Arc::new(ScriptedModel::new(replies))).await
}

pub(crate) async fn manager_with_model(
    model: Arc<dyn NarrativeModel>,
) -> (tempfile::TempDir, SessionManager, Arc<CollectingSink>) {
    let dir = tempfile::tempdir().unwrap();
    let store = GameStore::new(dir.path());
    seed_template(&store, "f1").await;
    let sink = Arc::new(CollectingSink::default());
    let manager = SessionManager::new(store, model, sink.clone());
    (dir, manager, sink)
}

pub(crate) async fn seed_template(store: &GameStore, file_id: &str) {
    let world = test_world();
    store
        .save_template(DocKind::Lore, file_id, &world.lore)
        .await
        .unwrap();
    store
        .save_template(DocKind::Player, file_id, &world.player)
        .await
        .unwrap();
    store
        .save_template(DocKind::Items, file_id, &world.items)
        .await
        .unwrap();
    store
        .save_template(DocKind::Scenes, file_id, &world.scenes)
        .await
        .unwrap();
}
