//! The item catalog: templates used to hydrate inventory entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The items document: item id → template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCatalog {
    pub items: BTreeMap<String, ItemTemplate>,
}

/// A reusable item definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form effect description consumed by the narrator prompt.
    #[serde(default)]
    pub effects: Option<serde_json::Value>,
    #[serde(default)]
    pub value: i64,
}

impl ItemCatalog {
    pub fn get(&self, item_id: &str) -> Option<&ItemTemplate> {
        self.items.get(item_id)
    }

    /// Find a template by case-insensitive display name (falls back to key).
    pub fn find_by_name(&self, name: &str) -> Option<(&str, &ItemTemplate)> {
        self.items
            .iter()
            .find(|(key, template)| {
                template.name.eq_ignore_ascii_case(name) || key.eq_ignore_ascii_case(name)
            })
            .map(|(key, template)| (key.as_str(), template))
    }
}
