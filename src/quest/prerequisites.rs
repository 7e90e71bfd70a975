//! Prerequisite Evaluator
//!
//! Decides whether a player may start a quest. Pure: no I/O, no mutation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::definition::{Prerequisites, QuestDefinition};
use super::state::QuestProgressData;

/// The parts of a player's state quest logic looks at
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSnapshot {
    pub username: String,
    pub level: u32,
    pub class: Option<String>,
    pub race: Option<String>,
    /// User flags
    pub flags: HashSet<String>,
    pub quest_flags: HashSet<String>,
    /// Item ID -> count held
    pub inventory: HashMap<String, u32>,
}

impl PlayerSnapshot {
    pub fn new(username: &str, level: u32) -> Self {
        Self {
            username: username.to_string(),
            level,
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn with_race(mut self, race: &str) -> Self {
        self.race = Some(race.to_string());
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn with_quest_flag(mut self, flag: &str) -> Self {
        self.quest_flags.insert(flag.to_string());
        self
    }

    pub fn with_item(mut self, item_id: &str, count: u32) -> Self {
        *self.inventory.entry(item_id.to_string()).or_insert(0) += count;
        self
    }

    pub fn item_count(&self, item_id: &str) -> u32 {
        self.inventory.get(item_id).copied().unwrap_or(0)
    }

    /// Whether a flag is set as either a user flag or a quest flag
    pub fn has_any_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag) || self.quest_flags.contains(flag)
    }
}

/// The first prerequisite check that failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteFailure {
    #[error("Requires level {required}.")]
    LevelTooLow { required: u32 },
    #[error("Requires level {maximum} or lower.")]
    LevelTooHigh { maximum: u32 },
    #[error("Requires class {required}.")]
    WrongClass { required: String },
    #[error("Requires race {required}.")]
    WrongRace { required: String },
    #[error("Missing quest flag '{0}'.")]
    MissingQuestFlag(String),
    #[error("Missing flag '{0}'.")]
    MissingFlag(String),
    #[error("Requires quest '{0}' to be completed.")]
    QuestNotCompleted(String),
    #[error("Not available after completing '{0}'.")]
    QuestAlreadyCompleted(String),
    #[error("Blocked by flag '{0}'.")]
    ForbiddenFlag(String),
    #[error("Requires being on step '{step_id}' of quest '{quest_id}'.")]
    NotOnStep { quest_id: String, step_id: String },
}

/// Eligibility verdict with a human-readable reason when ineligible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<String>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
        }
    }
}

/// Level, class, race and flag checks shared with dialogue gating
pub(crate) struct PlayerRequirements<'a> {
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    pub class: Option<&'a str>,
    pub race: Option<&'a str>,
    pub quest_flags: &'a [String],
    pub flags: &'a [String],
}

impl PlayerRequirements<'_> {
    pub(crate) fn check(&self, player: &PlayerSnapshot) -> Result<(), PrerequisiteFailure> {
        if let Some(required) = self.min_level {
            if player.level < required {
                return Err(PrerequisiteFailure::LevelTooLow { required });
            }
        }

        if let Some(maximum) = self.max_level {
            if player.level > maximum {
                return Err(PrerequisiteFailure::LevelTooHigh { maximum });
            }
        }

        if let Some(required) = self.class {
            let matches = player
                .class
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(required));
            if !matches {
                return Err(PrerequisiteFailure::WrongClass { required: required.to_string() });
            }
        }

        if let Some(required) = self.race {
            let matches = player
                .race
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case(required));
            if !matches {
                return Err(PrerequisiteFailure::WrongRace { required: required.to_string() });
            }
        }

        if let Some(flag) = self.quest_flags.iter().find(|f| !player.quest_flags.contains(*f)) {
            return Err(PrerequisiteFailure::MissingQuestFlag(flag.clone()));
        }

        if let Some(flag) = self.flags.iter().find(|f| !player.flags.contains(*f)) {
            return Err(PrerequisiteFailure::MissingFlag(flag.clone()));
        }

        Ok(())
    }
}

impl<'a> From<&'a Prerequisites> for PlayerRequirements<'a> {
    fn from(p: &'a Prerequisites) -> Self {
        Self {
            min_level: p.min_level,
            max_level: p.max_level,
            class: p.class.as_deref(),
            race: p.race.as_deref(),
            quest_flags: &p.quest_flags,
            flags: &p.flags,
        }
    }
}

/// Check a quest's prerequisites, stopping at the first failure
pub fn evaluate(
    player: &PlayerSnapshot,
    quest: &QuestDefinition,
    progress: &QuestProgressData,
) -> Result<(), PrerequisiteFailure> {
    let prereqs = &quest.prerequisites;

    PlayerRequirements::from(prereqs).check(player)?;

    if let Some(id) = prereqs
        .quests_completed
        .iter()
        .find(|id| !progress.is_quest_completed(id))
    {
        return Err(PrerequisiteFailure::QuestNotCompleted(id.clone()));
    }

    if let Some(id) = prereqs
        .quests_not_completed
        .iter()
        .find(|id| progress.is_quest_completed(id))
    {
        return Err(PrerequisiteFailure::QuestAlreadyCompleted(id.clone()));
    }

    Ok(())
}
