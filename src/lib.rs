//! Quest progression engine: quest definitions, per-player progress and
//! event-driven objective tracking for a multiplayer game server.

pub mod config;
pub mod error;
pub mod protocol;
pub mod quest;
pub mod store;

pub use config::EngineConfig;
pub use error::{CatalogError, ConfigError, QuestError, StoreError};
pub use quest::{PlayerSnapshot, QuestEngine};
pub use store::{InMemoryProgressRepository, ProgressRepository, SqliteProgressRepository};
