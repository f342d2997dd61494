//! Aggregated state deltas extracted from hint steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction of an inventory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Acquire,
    Lose,
}

impl ItemAction {
    /// Parse an action verb. The narrator emits the Chinese forms; the
    /// English synonyms appear in prompt examples and are accepted too.
    pub fn parse(verb: &str) -> Option<Self> {
        match verb {
            "获得" | "acquire" | "gain" => Some(ItemAction::Acquire),
            "丢失" | "lose" => Some(ItemAction::Lose),
            _ => None,
        }
    }

    /// Canonical verb used when re-serializing to marker text.
    pub fn verb(&self) -> &'static str {
        match self {
            ItemAction::Acquire => "获得",
            ItemAction::Lose => "丢失",
        }
    }
}

/// One inventory change, as emitted by the narrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemChange {
    pub name: String,
    pub action: ItemAction,
    pub quantity: u32,
}

/// All deltas from one reply, aggregated for the status engine.
///
/// Attribute deltas are aggregated only for the player; NPC-actor
/// attribute changes stay visible on their hint step but mutate no
/// document (the player document is the only mutable actor document).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBundle {
    /// Attribute name → summed delta for the player.
    pub attributes: BTreeMap<String, i64>,
    /// NPC name → summed relationship delta.
    pub relationships: BTreeMap<String, i64>,
    /// Inventory changes in emission order (not summed; order matters
    /// when an acquire and a lose target the same item).
    pub items: Vec<ItemChange>,
}

impl DeltaBundle {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty() && self.items.is_empty()
    }

    pub(crate) fn add_attribute(&mut self, name: &str, delta: i64) {
        *self.attributes.entry(name.to_string()).or_insert(0) += delta;
    }

    pub(crate) fn add_relationship(&mut self, npc: &str, delta: i64) {
        *self.relationships.entry(npc.to_string()).or_insert(0) += delta;
    }

    pub(crate) fn add_item(&mut self, change: ItemChange) {
        self.items.push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_action_verbs() {
        assert_eq!(ItemAction::parse("获得"), Some(ItemAction::Acquire));
        assert_eq!(ItemAction::parse("丢失"), Some(ItemAction::Lose));
        assert_eq!(ItemAction::parse("acquire"), Some(ItemAction::Acquire));
        assert_eq!(ItemAction::parse("lose"), Some(ItemAction::Lose));
        assert_eq!(ItemAction::parse("discard"), None);
    }

    #[test]
    fn test_attribute_deltas_sum() {
        let mut bundle = DeltaBundle::default();
        bundle.add_attribute("stamina", 5);
        bundle.add_attribute("stamina", -2);
        assert_eq!(bundle.attributes["stamina"], 3);
    }

    #[test]
    fn test_item_changes_keep_order() {
        let mut bundle = DeltaBundle::default();
        bundle.add_item(ItemChange {
            name: "rope".to_string(),
            action: ItemAction::Acquire,
            quantity: 2,
        });
        bundle.add_item(ItemChange {
            name: "rope".to_string(),
            action: ItemAction::Lose,
            quantity: 1,
        });
        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.items[0].action, ItemAction::Acquire);
        assert_eq!(bundle.items[1].action, ItemAction::Lose);
    }
}
