//! Scenes, NPCs and buildings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The scenes document: scene id → scene.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneMap {
    pub scenes: BTreeMap<String, Scene>,
}

/// One location the player can occupy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Background image path, filled in by the image pipeline.
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub npcs: Vec<Npc>,
    #[serde(default)]
    pub buildings: Vec<Building>,
}

/// A non-player character in a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Npc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Mirror of `player.network[name]`, kept in sync by the status engine.
    #[serde(default)]
    pub relationship: Option<i64>,
}

/// A building within a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub building_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub features: Vec<BuildingFeature>,
}

/// A notable feature of a building.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingFeature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl SceneMap {
    pub fn get(&self, scene_id: &str) -> Option<&Scene> {
        self.scenes.get(scene_id)
    }

    pub fn contains(&self, scene_id: &str) -> bool {
        self.scenes.contains_key(scene_id)
    }

    /// Find an NPC anywhere in the world by id.
    pub fn find_npc(&self, npc_id: &str) -> Option<(&str, &Npc)> {
        self.scenes.iter().find_map(|(scene_id, scene)| {
            scene
                .npcs
                .iter()
                .find(|n| n.id == npc_id)
                .map(|n| (scene_id.as_str(), n))
        })
    }

    /// Set the relationship mirror on every NPC with the given name.
    ///
    /// Returns true if any scene was modified.
    pub fn mirror_relationship(&mut self, npc_name: &str, level: i64) -> bool {
        let mut changed = false;
        for scene in self.scenes.values_mut() {
            for npc in scene.npcs.iter_mut().filter(|n| n.name == npc_name) {
                npc.relationship = Some(level);
                changed = true;
            }
        }
        changed
    }

    /// NPC and building ids must be unique across the whole map.
    pub fn validate_unique_ids(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::BTreeSet::new();
        for scene in self.scenes.values() {
            for npc in &scene.npcs {
                if !seen.insert(format!("npc:{}", npc.id)) {
                    return Err(format!("duplicate NPC id: {}", npc.id));
                }
            }
            for building in &scene.buildings {
                if !seen.insert(format!("building:{}", building.id)) {
                    return Err(format!("duplicate building id: {}", building.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_scenes() -> SceneMap {
        let mut scenes = BTreeMap::new();
        scenes.insert(
            "village".to_string(),
            Scene {
                name: "Village".to_string(),
                description: "A quiet village.".to_string(),
                background: None,
                npcs: vec![Npc {
                    id: "npc_bob".to_string(),
                    name: "Bob".to_string(),
                    age: Some(40),
                    gender: Some("male".to_string()),
                    job: Some("blacksmith".to_string()),
                    description: "A burly smith.".to_string(),
                    icon: None,
                    relationship: Some(95),
                }],
                buildings: vec![Building {
                    id: "bld_forge".to_string(),
                    name: "Forge".to_string(),
                    building_type: "workshop".to_string(),
                    description: "Sparks fly here.".to_string(),
                    icon: None,
                    features: vec![BuildingFeature {
                        id: "f_anvil".to_string(),
                        name: "Anvil".to_string(),
                        description: "Well worn.".to_string(),
                    }],
                }],
            },
        );
        scenes.insert(
            "forest".to_string(),
            Scene {
                name: "Forest".to_string(),
                description: "Dark and deep.".to_string(),
                background: None,
                npcs: vec![Npc {
                    id: "npc_bob2".to_string(),
                    name: "Bob".to_string(),
                    age: None,
                    gender: None,
                    job: None,
                    description: "The smith, wandering.".to_string(),
                    icon: None,
                    relationship: Some(95),
                }],
                buildings: Vec::new(),
            },
        );
        SceneMap { scenes }
    }

    #[test]
    fn test_serde_transparent_map() {
        let scenes = test_scenes();
        let json = serde_json::to_value(&scenes).unwrap();
        assert!(json.get("village").is_some());
        assert!(json.get("scenes").is_none());
    }

    #[test]
    fn test_find_npc_by_id() {
        let scenes = test_scenes();
        let (scene_id, npc) = scenes.find_npc("npc_bob").unwrap();
        assert_eq!(scene_id, "village");
        assert_eq!(npc.name, "Bob");
        assert!(scenes.find_npc("npc_missing").is_none());
    }

    #[test]
    fn test_mirror_relationship_touches_all_matches() {
        let mut scenes = test_scenes();
        assert!(scenes.mirror_relationship("Bob", 100));
        for scene in scenes.scenes.values() {
            for npc in scene.npcs.iter().filter(|n| n.name == "Bob") {
                assert_eq!(npc.relationship, Some(100));
            }
        }
    }

    #[test]
    fn test_mirror_relationship_unknown_name() {
        let mut scenes = test_scenes();
        assert!(!scenes.mirror_relationship("Nobody", 10));
    }

    #[test]
    fn test_validate_unique_ids() {
        let mut scenes = test_scenes();
        assert!(scenes.validate_unique_ids().is_ok());
        let dup = scenes.scenes["village"].npcs[0].clone();
        scenes
            .scenes
            .get_mut("forest")
            .unwrap()
            .npcs
            .push(dup);
        assert!(scenes.validate_unique_ids().is_err());
    }
}
