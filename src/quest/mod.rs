//! Quest System Module
//!
//! Data-driven quests loaded from TOML: definitions, per-player progress,
//! event matching, prerequisite checks, the progression engine and the
//! dialogue gate on top of it.

pub mod catalog;
pub mod definition;
pub mod dialogue;
pub mod engine;
pub mod events;
pub mod matcher;
pub mod prerequisites;
pub mod state;

pub use catalog::{start_file_watcher, CatalogHandle, HotReloadEvent, QuestCatalog};
pub use definition::{
    ObjectiveKind, QuestAction, QuestCategory, QuestDefinition, QuestObjective, QuestRewards,
    QuestStep,
};
pub use dialogue::DialogueChoice;
pub use engine::{QuestCompletion, QuestDialogue, QuestEngine, StartOptions};
pub use events::{EventPayload, GameEvent, QuestNotification, UpdateResult};
pub use prerequisites::{Eligibility, PlayerSnapshot, PrerequisiteFailure};
pub use state::{ActiveQuestState, QuestProgressData, QuestStatus};
