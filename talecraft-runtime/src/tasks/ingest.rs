//! World extraction and the external-collaborator seam of the ingest
//! workflow.
//!
//! The engine owns turning extracted document text into the four world
//! JSON documents. Text extraction itself, object-store uploads, the
//! relational record and user linkage are external collaborators behind
//! [`IngestBackend`].

use async_trait::async_trait;
use std::sync::Arc;

use openai::Message;
use talecraft_core::mission::strip_json_fences;
use talecraft_core::world::{ItemCatalog, Lore, Player, SceneMap, WorldDocs};
use talecraft_core::{NarrativeModel, Result};

/// External collaborators of the ingest workflow. Only the contracts are
/// part of the engine; implementations live with the hosting service.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    /// Extract plain text from the uploaded document bytes.
    async fn extract_text(&self, bytes: &[u8]) -> Result<String>;

    /// Upload the source document to object storage.
    async fn upload_source(&self, file_id: &str, bytes: &[u8]) -> Result<()>;

    /// Upload generated images to object storage.
    async fn upload_images(&self, file_id: &str) -> Result<()>;

    /// Upload the four world JSON documents to object storage.
    async fn upload_world_json(&self, file_id: &str) -> Result<()>;

    /// Create the relational record for the new file.
    async fn create_record(
        &self,
        file_id: &str,
        user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<()>;

    /// Append the file id to the user's file list.
    async fn link_user(&self, user_id: &str, file_id: &str) -> Result<()>;
}

/// Document text folded into each extraction prompt is capped here.
const DOCUMENT_MAX_CHARS: usize = 12_000;

/// Extracts the four world documents from design-document text via
/// structured model calls.
pub struct WorldExtractor {
    model: Arc<dyn NarrativeModel>,
}

impl WorldExtractor {
    pub fn new(model: Arc<dyn NarrativeModel>) -> Self {
        Self { model }
    }

    /// Run the four extractions in document order.
    pub async fn extract(&self, text: &str) -> Result<WorldDocs> {
        let lore: Lore = self.extract_doc(text, LORE_DIRECTIVE).await?;
        let player: Player = self.extract_doc(text, PLAYER_DIRECTIVE).await?;
        let items: ItemCatalog = self.extract_doc(text, ITEMS_DIRECTIVE).await?;
        let scenes: SceneMap = self.extract_doc(text, SCENES_DIRECTIVE).await?;
        Ok(WorldDocs {
            lore,
            player,
            items,
            scenes,
        })
    }

    async fn extract_doc<T: serde::de::DeserializeOwned>(
        &self,
        text: &str,
        directive: &str,
    ) -> Result<T> {
        let document: String = text.chars().take(DOCUMENT_MAX_CHARS).collect();
        let messages = vec![
            Message::system(format!(
                "You convert a narrative design document into structured game \
                 data. Respond with ONLY valid JSON, no markdown fences, no \
                 commentary.\n\n{directive}"
            )),
            Message::user(document),
        ];
        let reply = self.model.complete(messages).await?;
        Ok(serde_json::from_str(strip_json_fences(&reply))?)
    }
}

const LORE_DIRECTIVE: &str = "\
Produce the world lore object:
{\"title\": str, \"background\": [str], \"timePeriod\": str,
 \"events\": [{\"year\": int, \"title\": str, \"description\": str}],
 \"gameTime\": {\"year\": int, \"monthIndex\": 0, \"dayIndex\": 0, \"hourIndex\": 0},
 \"eras\": [{\"title\": str, \"startYear\": int, \"endYear\": int, \"description\": str,
            \"statsGrowth\": {attr: int}, \"currencyBonus\": int|null}],
 \"currentEraIndex\": 0}";

const PLAYER_DIRECTIVE: &str = "\
Produce the player object:
{\"profile\": {\"name\": str, \"age\": int, \"gender\": str},
 \"attributes\": {attr: int}, \"attributeCaps\": {attr: int},
 \"inventory\": [{\"id\": str, \"name\": str, \"description\": str, \"quantity\": int, \"value\": int}],
 \"currency\": int, \"location\": sceneId, \"unlockedScenes\": [sceneId],
 \"network\": {npcName: int}, \"flags\": {}, \"lastUpdated\": iso8601}
The starting location must be one of the scenes described by the document.";

const ITEMS_DIRECTIVE: &str = "\
Produce the item catalog: an object mapping item id to
{\"name\": str, \"description\": str, \"effects\": any, \"value\": int}.";

const SCENES_DIRECTIVE: &str = "\
Produce the scenes object: a mapping from scene id to
{\"name\": str, \"description\": str, \"background\": null,
 \"npcs\": [{\"id\": str, \"name\": str, \"age\": int, \"gender\": str, \"job\": str,
           \"description\": str, \"icon\": null, \"relationship\": int}],
 \"buildings\": [{\"id\": str, \"name\": str, \"type\": str, \"description\": str,
                 \"icon\": null, \"features\": [{\"id\": str, \"name\": str, \"description\": str}]}]}
NPC and building ids must be unique across all scenes.";
