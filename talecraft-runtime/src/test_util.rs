//! Shared runtime test fixtures.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use openai::Message;

use talecraft_core::world::{
    Era, GameTime, InventoryItem, ItemCatalog, Lore, Player, PlayerProfile, SceneMap,
};
use talecraft_core::{DocKind, EngineError, GameStore, NarrativeModel, Result};

/// Encode a tiny solid PNG for pipeline tests.
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([120, 40, 200, 255]),
    ));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub(crate) fn test_lore() -> Lore {
    Lore {
        title: "The Shattered Realm".to_string(),
        background: vec!["A village by the forest, under an old castle.".to_string()],
        time_period: "medieval".to_string(),
        events: Vec::new(),
        game_time: GameTime::new(100),
        eras: vec![Era {
            title: "Age of Ash".to_string(),
            start_year: 100,
            end_year: 120,
            description: String::new(),
            stats_growth: BTreeMap::new(),
            currency_bonus: None,
        }],
        current_era_index: 0,
    }
}

pub(crate) fn test_player() -> Player {
    Player {
        profile: PlayerProfile {
            name: "Alice".to_string(),
            age: 20,
            gender: "female".to_string(),
        },
        attributes: BTreeMap::new(),
        attribute_caps: BTreeMap::new(),
        inventory: vec![InventoryItem {
            id: "gold".to_string(),
            name: "Gold".to_string(),
            description: String::new(),
            quantity: 3,
            value: 1,
        }],
        currency: 100,
        location: "village".to_string(),
        unlocked_scenes: vec!["village".to_string()],
        network: BTreeMap::new(),
        flags: BTreeMap::new(),
        last_updated: Utc::now(),
    }
}

pub(crate) fn test_scenes() -> SceneMap {
    serde_json::from_value(serde_json::json!({
        "village": {
            "name": "Village",
            "description": "A quiet village.",
            "npcs": [{
                "id": "npc_bob", "name": "Bob", "job": "blacksmith",
                "description": "A burly smith."
            }],
            "buildings": [{
                "id": "bld_forge", "name": "Forge", "type": "workshop",
                "description": "Sparks fly here.", "features": []
            }]
        }
    }))
    .unwrap()
}

pub(crate) async fn seed_template(store: &GameStore, file_id: &str) {
    store
        .save_template(DocKind::Lore, file_id, &test_lore())
        .await
        .unwrap();
    store
        .save_template(DocKind::Player, file_id, &test_player())
        .await
        .unwrap();
    store
        .save_template(DocKind::Items, file_id, &ItemCatalog::default())
        .await
        .unwrap();
    store
        .save_template(DocKind::Scenes, file_id, &test_scenes())
        .await
        .unwrap();
}

/// Replays scripted completions; used for extractor and task tests.
pub(crate) struct ScriptedModel {
    replies: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = replies.into_iter().map(Into::into).collect();
        list.reverse(); // popped from the back
        Self {
            replies: Mutex::new(list),
        }
    }
}

#[async_trait]
impl NarrativeModel for ScriptedModel {
    async fn complete(&self, _messages: Vec<Message>) -> Result<String> {
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| EngineError::Llm(openai::Error::EmptyResponse))
    }

    async fn stream(&self, messages: Vec<Message>) -> Result<BoxStream<'static, Result<String>>> {
        let reply = self.complete(messages).await?;
        Ok(futures::stream::iter(vec![Ok(reply)]).boxed())
    }
}
