//! The world data model: typed JSON documents the engine persists.
//!
//! Four documents exist per world template (keyed by file id) and are
//! copied into the session namespace on first use:
//! - `lore` — background, eras, game time
//! - `player` — profile, attributes, inventory, relationships
//! - `scenes` — locations with NPCs and buildings
//! - `items` — the item template catalog

mod item;
mod lore;
mod mission;
mod player;
mod scene;

pub use item::{ItemCatalog, ItemTemplate};
pub use lore::{Era, GameTime, Lore, WorldEvent, DAYS_PER_MONTH, HOURS_PER_DAY, MONTHS_PER_YEAR};
pub use mission::{
    ItemQuantity, Mission, MissionPath, MissionStatus, MissionType, PathRequirements, PathRewards,
    RelationshipDelta, RelationshipLevel,
};
pub use player::{InventoryItem, Player, PlayerProfile, RELATIONSHIP_MAX, RELATIONSHIP_MIN};
pub use scene::{Building, BuildingFeature, Npc, Scene, SceneMap};

use serde::{Deserialize, Serialize};

/// The four world documents together, as returned by materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDocs {
    pub lore: Lore,
    pub player: Player,
    pub items: ItemCatalog,
    pub scenes: SceneMap,
}
