//! Quest Definition Structures
//!
//! These structures are deserialized from TOML quest files and are
//! immutable once they reach the catalog.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_count() -> u32 {
    1
}

/// Broad grouping used by quest logs and availability listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestCategory {
    Main,
    #[default]
    Side,
    ClassTrial,
    Tutorial,
    Daily,
    Event,
}

/// Conditions on player state required before a quest may be started
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prerequisites {
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    pub class: Option<String>,
    pub race: Option<String>,
    /// Quest flags that must all be set
    pub quest_flags: Vec<String>,
    /// User flags that must all be set
    pub flags: Vec<String>,
    /// Quests that must all appear in the completed history
    pub quests_completed: Vec<String>,
    /// Quests that must not appear in the completed history
    pub quests_not_completed: Vec<String>,
}

/// Quest chain configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestChain {
    /// Previous quest in the chain
    pub previous: Option<String>,
    /// Quest that unlocks after this one
    pub next: Option<String>,
    /// Quest this branches from (for alternate paths)
    pub branch_from: Option<String>,
}

/// What an objective is waiting for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Use an item of a given type
    UseItem { item_id: String },
    /// Pick an item up off the ground
    PickupItem { item_id: String },
    /// Hold an item in inventory (polled, not event-driven)
    HaveItem { item_id: String },
    /// Talk to an NPC, optionally picking a specific dialogue option
    TalkToNpc {
        npc_template_id: String,
        #[serde(default)]
        dialogue_option: Option<String>,
    },
    /// Kill NPCs built from a template
    KillMob { npc_template_id: String },
    /// Walk into a room
    EnterRoom { room_id: String },
    /// Have a user or quest flag set (polled, not event-driven)
    HaveFlag { flag: String },
    /// Hand an item to an NPC
    DeliverItem {
        item_id: String,
        npc_template_id: String,
    },
    /// Reach a character level
    ReachLevel { level: u32 },
    /// Equip an item, optionally into a specific slot
    EquipItem {
        item_id: String,
        #[serde(default)]
        slot: Option<String>,
    },
}

/// One measurable condition within a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestObjective {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Number of matching events required (ignored by `reach_level`)
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(flatten)]
    pub kind: ObjectiveKind,
}

impl QuestObjective {
    /// Amount `current` must reach before the objective completes
    pub fn required_count(&self) -> u32 {
        let required = match &self.kind {
            ObjectiveKind::ReachLevel { level } => *level,
            _ => self.count.unwrap_or_else(default_count),
        };
        required.max(1)
    }
}

/// Side effects handed to the action executor on step start/complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestAction {
    Message { text: String },
    GiveItem {
        item_id: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    RemoveItem {
        item_id: String,
        #[serde(default = "default_count")]
        count: u32,
    },
    GiveExperience { amount: u64 },
    GiveCurrency { currency: String, amount: i64 },
    SetQuestFlag { flag: String },
    SetFlag { flag: String },
    Teleport { room_id: String },
}

/// Requirement that the player is currently on a particular step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStepRequirement {
    pub quest_id: String,
    pub step_id: String,
}

/// Per-option gate for NPC conversation choices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueRequirements {
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    pub class: Option<String>,
    pub race: Option<String>,
    pub flags: Vec<String>,
    pub not_flags: Vec<String>,
    pub quest_flags: Vec<String>,
    pub active_step: Option<ActiveStepRequirement>,
}

/// A single conversation choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub requirements: DialogueRequirements,
    /// Step to branch to when this option is picked
    #[serde(default)]
    pub advance_to_step: Option<String>,
    #[serde(default)]
    pub actions: Vec<QuestAction>,
}

/// What an NPC says while the player is on a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDialogue {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub options: Vec<DialogueOption>,
}

/// An ordered phase of a quest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objectives: Vec<QuestObjective>,
    /// Dialogue keyed by NPC template ID
    #[serde(default)]
    pub dialogues: HashMap<String, StepDialogue>,
    #[serde(default)]
    pub on_start: Vec<QuestAction>,
    #[serde(default)]
    pub on_complete: Vec<QuestAction>,
    /// All objectives (true) or any single objective (false)
    #[serde(default = "default_true")]
    pub require_all_objectives: bool,
}

impl QuestStep {
    /// Step IDs this step can branch to through dialogue
    pub fn branch_targets(&self) -> impl Iterator<Item = &str> {
        self.dialogues
            .values()
            .flat_map(|d| d.options.iter())
            .filter_map(|o| o.advance_to_step.as_deref())
    }
}

/// Item reward entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReward {
    pub item_id: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Rewards handed back on completion for the action executor to apply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestRewards {
    pub experience: u64,
    pub quest_flags: Vec<String>,
    pub flags: Vec<String>,
    pub items: Vec<ItemReward>,
    /// Currency name -> delta
    pub currency: BTreeMap<String, i64>,
    pub message: Option<String>,
}

/// A fully resolved quest definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: QuestCategory,
    #[serde(default)]
    pub repeatable: bool,
    /// Seconds that must pass between completions of a repeatable quest
    #[serde(default)]
    pub repeat_cooldown_secs: Option<i64>,
    #[serde(default)]
    pub prerequisites: Prerequisites,
    #[serde(default)]
    pub steps: Vec<QuestStep>,
    #[serde(default)]
    pub rewards: Option<QuestRewards>,
    #[serde(default)]
    pub chain: Option<QuestChain>,
}

impl QuestDefinition {
    pub fn first_step(&self) -> Option<&QuestStep> {
        self.steps.first()
    }

    pub fn step(&self, step_id: &str) -> Option<&QuestStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The step following `step_id` in definition order
    pub fn next_step(&self, step_id: &str) -> Option<&QuestStep> {
        let index = self.steps.iter().position(|s| s.id == step_id)?;
        self.steps.get(index + 1)
    }

    /// Check that step IDs are unique and every branch target resolves
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err("quest has no steps".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
        }

        for step in &self.steps {
            for target in step.branch_targets() {
                if !seen.contains(target) {
                    return Err(format!(
                        "step '{}' advances to unknown step '{}'",
                        step.id, target
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEST_TOML: &str = r#"
id = "rat_problem"
name = "Rat Problem"
category = "tutorial"
repeatable = true
repeat_cooldown_secs = 3600

[prerequisites]
min_level = 2
quests_completed = ["welcome"]

[[steps]]
id = "hunt"
name = "Hunt the rats"
require_all_objectives = false

[[steps.objectives]]
id = "kill_rats"
type = "kill_mob"
npc_template_id = "cellar_rat"
count = 3

[[steps.objectives]]
id = "reach_five"
type = "reach_level"
level = 5

[[steps.on_complete]]
type = "give_item"
item_id = "cheese"

[[steps]]
id = "report"
name = "Report back"

[[steps.objectives]]
id = "talk_innkeeper"
type = "talk_to_npc"
npc_template_id = "innkeeper"

[steps.dialogues.innkeeper]
text = "Did you clear the cellar?"

[[steps.dialogues.innkeeper.options]]
id = "yes"
text = "All done."
advance_to_step = "hunt"

[rewards]
experience = 40
currency = { gold = 5 }
"#;

    #[test]
    fn test_parse_quest_definition() {
        let quest: QuestDefinition = toml::from_str(QUEST_TOML).unwrap();
        assert_eq!(quest.category, QuestCategory::Tutorial);
        assert_eq!(quest.prerequisites.min_level, Some(2));
        assert_eq!(quest.steps.len(), 2);

        let hunt = &quest.steps[0];
        assert!(!hunt.require_all_objectives);
        assert!(quest.steps[1].require_all_objectives);
        assert_eq!(hunt.objectives[0].required_count(), 3);
        assert_eq!(hunt.objectives[1].required_count(), 5);
        assert_eq!(
            hunt.on_complete,
            vec![QuestAction::GiveItem { item_id: "cheese".to_string(), count: 1 }]
        );

        let rewards = quest.rewards.as_ref().unwrap();
        assert_eq!(rewards.experience, 40);
        assert_eq!(rewards.currency.get("gold"), Some(&5));

        assert!(quest.validate().is_ok());
        assert_eq!(quest.next_step("hunt").map(|s| s.id.as_str()), Some("report"));
        assert!(quest.next_step("report").is_none());
    }

    #[test]
    fn test_default_count_is_one() {
        let objective = QuestObjective {
            id: "enter".to_string(),
            description: String::new(),
            count: None,
            kind: ObjectiveKind::EnterRoom { room_id: "cellar".to_string() },
        };
        assert_eq!(objective.required_count(), 1);
    }

    #[test]
    fn test_validate_rejects_unknown_branch() {
        let mut quest: QuestDefinition = toml::from_str(QUEST_TOML).unwrap();
        quest.steps[1]
            .dialogues
            .get_mut("innkeeper")
            .unwrap()
            .options[0]
            .advance_to_step = Some("nowhere".to_string());
        assert!(quest.validate().is_err());
    }
}
