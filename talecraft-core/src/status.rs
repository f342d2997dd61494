//! The status engine: applies parsed deltas to the player document.
//!
//! Application order is fixed: attributes, then inventory, then
//! relationships, then the `last_updated` stamp. Relationship levels are
//! mirrored into every scene NPC with a matching name so the scenes
//! document stays consistent with `player.network`.

use chrono::Utc;

use crate::parser::{DeltaBundle, ItemAction};
use crate::world::{InventoryItem, ItemCatalog, Player, SceneMap};

/// What `apply` touched, so callers persist only what changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub player_changed: bool,
    pub scenes_changed: bool,
}

/// Applies delta bundles under the player-document invariants.
pub struct StatusEngine;

impl StatusEngine {
    pub fn new() -> Self {
        Self
    }

    /// Apply a delta bundle in place.
    ///
    /// With an empty bundle the player is unchanged (the `last_updated`
    /// stamp is only touched when something else is).
    pub fn apply(
        &self,
        player: &mut Player,
        scenes: &mut SceneMap,
        catalog: &ItemCatalog,
        deltas: &DeltaBundle,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if deltas.is_empty() {
            return outcome;
        }

        for (name, delta) in &deltas.attributes {
            player.adjust_attribute(name, *delta);
        }

        for change in &deltas.items {
            match change.action {
                ItemAction::Acquire => self.acquire(player, catalog, &change.name, change.quantity),
                ItemAction::Lose => self.lose(player, &change.name, change.quantity),
            }
        }
        player.prune_empty_items();

        for (npc, delta) in &deltas.relationships {
            let level = player.adjust_relationship(npc, *delta);
            if scenes.mirror_relationship(npc, level) {
                outcome.scenes_changed = true;
            }
        }

        player.last_updated = Utc::now();
        outcome.player_changed = true;
        outcome
    }

    /// Merge into the inventory by case-insensitive name, hydrating new
    /// entries from the item catalog when a template matches.
    fn acquire(&self, player: &mut Player, catalog: &ItemCatalog, name: &str, quantity: u32) {
        if let Some(existing) = player.find_item_mut(name) {
            existing.quantity = existing.quantity.saturating_add(quantity);
            return;
        }
        let entry = match catalog.find_by_name(name) {
            Some((key, template)) => InventoryItem {
                id: key.to_string(),
                name: template.name.clone(),
                description: template.description.clone(),
                quantity,
                value: template.value,
            },
            None => InventoryItem {
                id: slugify(name),
                name: name.to_string(),
                description: String::new(),
                quantity,
                value: 0,
            },
        };
        player.inventory.push(entry);
    }

    /// Subtract from a stack; entries that reach zero are removed.
    fn lose(&self, player: &mut Player, name: &str, quantity: u32) {
        if let Some(existing) = player.find_item_mut(name) {
            existing.quantity = existing.quantity.saturating_sub(quantity);
        }
    }
}

impl Default for StatusEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased, underscore-joined id for items the catalog does not know.
fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ItemChange;
    use crate::world::{ItemTemplate, PlayerProfile};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn player() -> Player {
        Player {
            profile: PlayerProfile {
                name: "Alice".to_string(),
                age: 20,
                gender: "female".to_string(),
            },
            attributes: BTreeMap::from([("strength".to_string(), 18)]),
            attribute_caps: BTreeMap::from([("strength".to_string(), 20)]),
            inventory: vec![InventoryItem {
                id: "gold".to_string(),
                name: "Gold".to_string(),
                description: String::new(),
                quantity: 2,
                value: 1,
            }],
            currency: 50,
            location: "village".to_string(),
            unlocked_scenes: vec!["village".to_string()],
            network: BTreeMap::from([("Bob".to_string(), 95)]),
            flags: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    fn catalog() -> ItemCatalog {
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
        ItemCatalog { items }
    }

    fn scenes() -> SceneMap {
        serde_json::from_value(serde_json::json!({
            "village": {
                "name": "Village",
                "npcs": [{"id": "npc_bob", "name": "Bob", "relationship": 95}],
                "buildings": []
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_apply_empty_bundle_is_identity() {
        let engine = StatusEngine::new();
        let mut p = player();
        let before = serde_json::to_value(&p).unwrap();
        let mut s = scenes();
        let outcome = engine.apply(&mut p, &mut s, &catalog(), &DeltaBundle::default());
        assert_eq!(outcome, ApplyOutcome::default());
        assert_eq!(serde_json::to_value(&p).unwrap(), before);
    }

    #[test]
    fn test_attribute_clamped_to_cap() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.attributes.insert("strength".to_string(), 10);
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.attributes["strength"], 20);
    }

    #[test]
    fn test_acquire_merges_case_insensitive() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.items.push(ItemChange {
            name: "gOLD".to_string(),
            action: ItemAction::Acquire,
            quantity: 5,
        });
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.inventory.len(), 1);
        assert_eq!(p.find_item("gold").unwrap().quantity, 7);
    }

    #[test]
    fn test_acquire_hydrates_from_catalog() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.items.push(ItemChange {
            name: "healing potion".to_string(),
            action: ItemAction::Acquire,
            quantity: 1,
        });
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        let item = p.find_item("Healing Potion").unwrap();
        assert_eq!(item.id, "healing_potion");
        assert_eq!(item.description, "Restores vigor.");
        assert_eq!(item.value, 25);
    }

    #[test]
    fn test_acquire_unknown_item_gets_slug_id() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.items.push(ItemChange {
            name: "Old Map".to_string(),
            action: ItemAction::Acquire,
            quantity: 1,
        });
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.find_item("old map").unwrap().id, "old_map");
    }

    #[test]
    fn test_lose_beyond_stock_removes_entry() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.items.push(ItemChange {
            name: "Gold".to_string(),
            action: ItemAction::Lose,
            quantity: 10,
        });
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert!(p.find_item("Gold").is_none());
    }

    #[test]
    fn test_lose_unknown_item_is_noop() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.items.push(ItemChange {
            name: "ghost".to_string(),
            action: ItemAction::Lose,
            quantity: 1,
        });
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.inventory.len(), 1);
    }

    #[test]
    fn test_relationship_clamps_and_mirrors() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.relationships.insert("Bob".to_string(), 10);
        let outcome = engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.network["Bob"], 100);
        assert!(outcome.scenes_changed);
        let npc = &s.scenes["village"].npcs[0];
        assert_eq!(npc.relationship, Some(100));
    }

    #[test]
    fn test_relationship_to_unknown_npc_updates_network_only() {
        let engine = StatusEngine::new();
        let mut p = player();
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.relationships.insert("Stranger".to_string(), -30);
        let outcome = engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert_eq!(p.network["Stranger"], -30);
        assert!(!outcome.scenes_changed);
    }

    #[test]
    fn test_last_updated_advances_on_change() {
        let engine = StatusEngine::new();
        let mut p = player();
        let before = p.last_updated;
        let mut s = scenes();
        let mut deltas = DeltaBundle::default();
        deltas.attributes.insert("strength".to_string(), 1);
        engine.apply(&mut p, &mut s, &catalog(), &deltas);
        assert!(p.last_updated >= before);
    }
}
