//! Error types for the quest engine.
//!
//! `QuestError` display strings are the user-facing messages command
//! handlers show verbatim.

use thiserror::Error;

use crate::quest::prerequisites::PrerequisiteFailure;

/// Errors returned by engine operations
#[derive(Error, Debug)]
pub enum QuestError {
    #[error("Quest not found.")]
    NotFound,

    #[error("Quest is already active.")]
    AlreadyActive,

    #[error("Quest already completed.")]
    AlreadyCompleted,

    #[error("Quest is on cooldown.")]
    OnCooldown {
        /// Seconds until the quest can be repeated
        remaining_secs: i64,
    },

    #[error("Prerequisites not met.")]
    PrerequisitesNotMet(PrerequisiteFailure),

    #[error("Invalid starting step.")]
    InvalidStep,

    #[error("Quest is not active.")]
    NotActive,

    #[error("Failed to save quest progress: {0}")]
    Persistence(#[from] StoreError),
}

impl QuestError {
    /// Whether this error came from the storage layer rather than game rules
    pub fn is_persistence(&self) -> bool {
        matches!(self, QuestError::Persistence(_))
    }
}

/// Errors from a progress repository
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors from loading quest definitions off disk
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Quest '{quest_id}' is invalid: {reason}")]
    Invalid { quest_id: String, reason: String },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Errors from loading the engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
