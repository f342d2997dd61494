//! Missions: goals with alternative completion paths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Whether a mission gates the main storyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionType {
    /// Optional content; the story continues around it.
    Side,
    /// Blocks the storyline while active.
    Story,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Active,
    Completed,
    Failed,
    Abandoned,
}

/// A mission with one or more alternative completion paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub mission_type: MissionType,
    pub title: String,
    pub description: String,
    pub status: MissionStatus,
    pub created_at_turn: u64,
    #[serde(default)]
    pub paths: Vec<MissionPath>,
    /// Set when the mission completes; makes re-submission idempotent.
    #[serde(default)]
    pub completed_path_id: Option<String>,
}

impl Mission {
    pub fn new(
        mission_type: MissionType,
        title: impl Into<String>,
        description: impl Into<String>,
        created_at_turn: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mission_type,
            title: title.into(),
            description: description.into(),
            status: MissionStatus::Active,
            created_at_turn,
            paths: Vec::new(),
            completed_path_id: None,
        }
    }

    /// A mission is storyline-blocking iff it is an active story mission.
    pub fn is_blocking(&self) -> bool {
        self.mission_type == MissionType::Story && self.status == MissionStatus::Active
    }
}

/// One way to complete a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPath {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub requirements: PathRequirements,
    #[serde(default)]
    pub rewards: PathRewards,
}

/// Requirements gate completion; nothing here is consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequirements {
    #[serde(default)]
    pub items: Vec<ItemQuantity>,
    /// Minimum currency on hand (a gate, not a payment).
    #[serde(default)]
    pub currency: Option<i64>,
    #[serde(default)]
    pub relationships: Vec<RelationshipLevel>,
    /// Required current scene id.
    #[serde(default)]
    pub location: Option<String>,
    /// Required flag values.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

/// Rewards applied on completion; symmetric to requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRewards {
    /// Items consumed (deducted) by completing this path.
    #[serde(default)]
    pub items: Vec<ItemQuantity>,
    /// Currency credited.
    #[serde(default)]
    pub currency: Option<i64>,
    /// Relationship deltas applied and mirrored into scenes.
    #[serde(default)]
    pub relationships: Vec<RelationshipDelta>,
    /// Flags set on the player.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuantity {
    pub name: String,
    pub qty: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipLevel {
    pub npc: String,
    pub min_level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDelta {
    pub npc: String,
    pub delta: i64,
}
