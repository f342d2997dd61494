//! The player document: profile, attributes, inventory, relationships.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relationship values are clamped to this range.
pub const RELATIONSHIP_MIN: i64 = -100;
pub const RELATIONSHIP_MAX: i64 = 100;

/// The player document, one per session (copied from a template).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub profile: PlayerProfile,
    /// Attribute name → current value.
    #[serde(default)]
    pub attributes: BTreeMap<String, i64>,
    /// Attribute name → maximum value. Absent entries are uncapped.
    #[serde(default)]
    pub attribute_caps: BTreeMap<String, i64>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    /// Integer currency, never negative.
    #[serde(default)]
    pub currency: i64,
    /// Current scene id.
    pub location: String,
    /// Scene ids the player may move to. Always contains `location`.
    #[serde(default)]
    pub unlocked_scenes: Vec<String>,
    /// NPC name → relationship level in [-100, 100].
    #[serde(default)]
    pub network: BTreeMap<String, i64>,
    /// Open key→value flags set by missions and story beats.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

/// Immutable-ish identity facts about the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub name: String,
    pub age: u32,
    pub gender: String,
}

/// One stack of items in the player inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub quantity: u32,
    #[serde(default)]
    pub value: i64,
}

impl Player {
    /// Find an inventory entry by case-insensitive name.
    pub fn find_item(&self, name: &str) -> Option<&InventoryItem> {
        self.inventory
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Find an inventory entry by case-insensitive name, mutably.
    pub fn find_item_mut(&mut self, name: &str) -> Option<&mut InventoryItem> {
        self.inventory
            .iter_mut()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Find an inventory entry by id.
    pub fn find_item_by_id(&self, id: &str) -> Option<&InventoryItem> {
        self.inventory.iter().find(|i| i.id == id)
    }

    /// Apply a signed attribute delta, clamping to `[0, cap]`.
    pub fn adjust_attribute(&mut self, name: &str, delta: i64) -> i64 {
        let current = self.attributes.get(name).copied().unwrap_or(0);
        let mut next = (current + delta).max(0);
        if let Some(cap) = self.attribute_caps.get(name) {
            next = next.min(*cap);
        }
        self.attributes.insert(name.to_string(), next);
        next
    }

    /// Apply a signed relationship delta, clamping to [-100, 100].
    pub fn adjust_relationship(&mut self, npc: &str, delta: i64) -> i64 {
        let current = self.network.get(npc).copied().unwrap_or(0);
        let next = (current + delta).clamp(RELATIONSHIP_MIN, RELATIONSHIP_MAX);
        self.network.insert(npc.to_string(), next);
        next
    }

    /// Apply a signed currency delta, flooring at zero.
    pub fn adjust_currency(&mut self, delta: i64) -> i64 {
        self.currency = (self.currency + delta).max(0);
        self.currency
    }

    /// Add a scene id to the unlocked set (idempotent).
    pub fn unlock_scene(&mut self, scene_id: &str) {
        if !self.unlocked_scenes.iter().any(|s| s == scene_id) {
            self.unlocked_scenes.push(scene_id.to_string());
        }
    }

    /// Whether the player may enter the given scene.
    pub fn has_unlocked(&self, scene_id: &str) -> bool {
        self.unlocked_scenes.iter().any(|s| s == scene_id)
    }

    /// Move to a scene, maintaining the `unlocked ⊇ {location}` invariant.
    pub fn move_to(&mut self, scene_id: &str) {
        self.location = scene_id.to_string();
        self.unlock_scene(scene_id);
    }

    /// Drop inventory entries whose quantity reached zero.
    pub fn prune_empty_items(&mut self) {
        self.inventory.retain(|i| i.quantity > 0);
    }
}
