//! Quest Event Types
//!
//! Inbound game events that advance objectives, and the lifecycle
//! notifications the engine publishes in return.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::definition::{QuestAction, QuestRewards};

pub const NPC_DEATH: &str = "npc:death";
pub const NPC_TALKED: &str = "npc:talked";
pub const ROOM_ENTER: &str = "room:enter";
pub const ITEM_PICKUP: &str = "item:pickup";
pub const ITEM_USED: &str = "item:used";
pub const ITEM_EQUIPPED: &str = "item:equipped";
pub const ITEM_DELIVERED: &str = "item:delivered";
pub const PLAYER_LEVELUP: &str = "player:levelup";

/// Flat key/value payload carried by a game event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(Map<String, Value>);

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String field; numbers are rendered so IDs sent as integers still match
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Unsigned integer field; numeric strings are accepted
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether `key` is present and equal to `expected`
    pub fn field_equals(&self, key: &str, expected: &str) -> bool {
        self.get_str(key).is_some_and(|v| v == expected)
    }
}

impl From<Map<String, Value>> for EventPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Typed game events, converted to name + payload for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    NpcDeath {
        npc_template_id: String,
    },
    NpcTalked {
        npc_template_id: String,
        dialogue_option: Option<String>,
    },
    RoomEnter {
        room_id: String,
        previous_room_id: Option<String>,
    },
    ItemPickup {
        item_id: String,
        instance_id: String,
    },
    ItemUsed {
        item_id: String,
        instance_id: String,
    },
    ItemEquipped {
        item_id: String,
        instance_id: String,
        slot: String,
    },
    ItemDelivered {
        item_id: String,
        instance_id: String,
        npc_template_id: String,
    },
    PlayerLevelUp {
        level: u32,
        previous_level: u32,
    },
}

impl GameEvent {
    /// Event name as understood by the objective matcher
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::NpcDeath { .. } => NPC_DEATH,
            GameEvent::NpcTalked { .. } => NPC_TALKED,
            GameEvent::RoomEnter { .. } => ROOM_ENTER,
            GameEvent::ItemPickup { .. } => ITEM_PICKUP,
            GameEvent::ItemUsed { .. } => ITEM_USED,
            GameEvent::ItemEquipped { .. } => ITEM_EQUIPPED,
            GameEvent::ItemDelivered { .. } => ITEM_DELIVERED,
            GameEvent::PlayerLevelUp { .. } => PLAYER_LEVELUP,
        }
    }

    pub fn payload(&self) -> EventPayload {
        match self {
            GameEvent::NpcDeath { npc_template_id } => {
                EventPayload::new().with("npcTemplateId", npc_template_id.as_str())
            }
            GameEvent::NpcTalked { npc_template_id, dialogue_option } => {
                let payload = EventPayload::new().with("npcTemplateId", npc_template_id.as_str());
                match dialogue_option {
                    Some(option) => payload.with("dialogueOption", option.as_str()),
                    None => payload,
                }
            }
            GameEvent::RoomEnter { room_id, previous_room_id } => {
                let payload = EventPayload::new().with("roomId", room_id.as_str());
                match previous_room_id {
                    Some(prev) => payload.with("previousRoomId", prev.as_str()),
                    None => payload,
                }
            }
            GameEvent::ItemPickup { item_id, instance_id }
            | GameEvent::ItemUsed { item_id, instance_id } => EventPayload::new()
                .with("itemId", item_id.as_str())
                .with("instanceId", instance_id.as_str()),
            GameEvent::ItemEquipped { item_id, instance_id, slot } => EventPayload::new()
                .with("itemId", item_id.as_str())
                .with("instanceId", instance_id.as_str())
                .with("slot", slot.as_str()),
            GameEvent::ItemDelivered {
                item_id,
                instance_id,
                npc_template_id,
            } => EventPayload::new()
                .with("itemId", item_id.as_str())
                .with("instanceId", instance_id.as_str())
                .with("npcTemplateId", npc_template_id.as_str()),
            GameEvent::PlayerLevelUp { level, previous_level } => EventPayload::new()
                .with("level", *level)
                .with("previousLevel", *previous_level),
        }
    }
}

/// Lifecycle notifications published by the engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum QuestNotification {
    #[serde(rename = "quest:started")]
    Started {
        username: String,
        quest_id: String,
        step_id: String,
        /// On-start actions of the starting step
        actions: Vec<QuestAction>,
    },
    #[serde(rename = "quest:abandoned")]
    Abandoned { username: String, quest_id: String },
    #[serde(rename = "quest:completed")]
    Completed {
        username: String,
        quest_id: String,
        completion_count: u32,
        rewards: Option<QuestRewards>,
    },
    #[serde(rename = "quest:failed")]
    Failed {
        username: String,
        quest_id: String,
        reason: Option<String>,
    },
    #[serde(rename = "quest:step_completed")]
    StepCompleted {
        username: String,
        quest_id: String,
        step_id: String,
        next_step_id: Option<String>,
        /// On-complete actions of the finished step followed by on-start
        /// actions of the next one
        actions: Vec<QuestAction>,
    },
    #[serde(rename = "quest:objective_updated")]
    ObjectiveUpdated {
        username: String,
        quest_id: String,
        step_id: String,
        objective_id: String,
        current: u32,
        required: u32,
        completed: bool,
    },
}

impl QuestNotification {
    pub fn name(&self) -> &'static str {
        match self {
            QuestNotification::Started { .. } => "quest:started",
            QuestNotification::Abandoned { .. } => "quest:abandoned",
            QuestNotification::Completed { .. } => "quest:completed",
            QuestNotification::Failed { .. } => "quest:failed",
            QuestNotification::StepCompleted { .. } => "quest:step_completed",
            QuestNotification::ObjectiveUpdated { .. } => "quest:objective_updated",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            QuestNotification::Started { username, .. }
            | QuestNotification::Abandoned { username, .. }
            | QuestNotification::Completed { username, .. }
            | QuestNotification::Failed { username, .. }
            | QuestNotification::StepCompleted { username, .. }
            | QuestNotification::ObjectiveUpdated { username, .. } => username,
        }
    }

    pub fn quest_id(&self) -> &str {
        match self {
            QuestNotification::Started { quest_id, .. }
            | QuestNotification::Abandoned { quest_id, .. }
            | QuestNotification::Completed { quest_id, .. }
            | QuestNotification::Failed { quest_id, .. }
            | QuestNotification::StepCompleted { quest_id, .. }
            | QuestNotification::ObjectiveUpdated { quest_id, .. } => quest_id,
        }
    }
}

/// One objective touched by an event or poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectiveUpdate {
    pub objective_id: String,
    pub current: u32,
    pub required: u32,
    pub completed: bool,
}

/// Result of processing an event against one active quest
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub quest_id: String,
    /// Step the objectives belonged to
    pub step_id: String,
    pub objectives: Vec<ObjectiveUpdate>,
    /// Whether any objective was just completed
    pub objective_completed: bool,
    pub step_completed: bool,
    /// Step that became current, if the quest moved on
    pub next_step_id: Option<String>,
    pub quest_completed: bool,
    /// Rewards for the caller to apply when the quest completed
    pub rewards: Option<QuestRewards>,
}

impl UpdateResult {
    pub fn new(quest_id: &str, step_id: &str) -> Self {
        Self {
            quest_id: quest_id.to_string(),
            step_id: step_id.to_string(),
            objectives: Vec::new(),
            objective_completed: false,
            step_completed: false,
            next_step_id: None,
            quest_completed: false,
            rewards: None,
        }
    }

    pub fn has_progress(&self) -> bool {
        !self.objectives.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let payload = EventPayload::new()
            .with("npcTemplateId", "wolf")
            .with("level", 7)
            .with("roomId", 42);

        assert_eq!(payload.get_str("npcTemplateId").as_deref(), Some("wolf"));
        assert_eq!(payload.get_u64("level"), Some(7));
        assert!(payload.field_equals("roomId", "42"));
        assert!(payload.get_str("missing").is_none());
    }

    #[test]
    fn test_game_event_payload() {
        let event = GameEvent::ItemDelivered {
            item_id: "letter".to_string(),
            instance_id: "i-1".to_string(),
            npc_template_id: "mayor".to_string(),
        };
        assert_eq!(event.name(), ITEM_DELIVERED);
        let payload = event.payload();
        assert!(payload.field_equals("itemId", "letter"));
        assert!(payload.field_equals("npcTemplateId", "mayor"));
    }

    #[test]
    fn test_notification_serializes_with_event_name() {
        let n = QuestNotification::Abandoned {
            username: "bob".to_string(),
            quest_id: "q".to_string(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "quest:abandoned");
        assert_eq!(n.name(), "quest:abandoned");
    }
}
