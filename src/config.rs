//! Engine configuration, read from a TOML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "QUEST_ENGINE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "quest_engine.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory scanned for quest `.toml` files
    pub data_dir: PathBuf,
    pub database_url: String,
    /// Upper bound on a single progress load or save
    pub persistence_timeout_ms: u64,
    /// Buffer size of the notification broadcast channel
    pub notification_capacity: usize,
    /// Watch `data_dir` and reload the catalog on change
    pub hot_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/quests"),
            database_url: "sqlite:quests.db?mode=rwc".to_string(),
            persistence_timeout_ms: 5000,
            notification_capacity: 256,
            hot_reload: false,
        }
    }
}

impl EngineConfig {
    /// Parse a config file. Keys left out keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from `$QUEST_ENGINE_CONFIG` (or `quest_engine.toml`), falling
    /// back to defaults when the file does not exist
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let config = Self::load(&path)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.toml");
        std::fs::write(&path, "data_dir = \"content/quests\"\nhot_reload = true\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("content/quests"));
        assert!(config.hot_reload);
        assert_eq!(config.persistence_timeout_ms, 5000);
        assert_eq!(config.notification_capacity, 256);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.toml");
        std::fs::write(&path, "persistence_timeout_ms = \"soon\"").unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            EngineConfig::load(&temp_dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
