//! Progress Store
//!
//! Caches each player's `QuestProgressData` behind its own async mutex.
//! The first access for a player loads from the repository while holding
//! that player's lock, so concurrent first accesses share one load.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::quest::state::QuestProgressData;

pub use memory::InMemoryProgressRepository;
pub use sqlite::SqliteProgressRepository;

/// Durable storage for per-player quest progress
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<QuestProgressData>, StoreError>;

    async fn save(&self, data: &QuestProgressData) -> Result<(), StoreError>;
}

/// Cached progress plus whether it may differ from the stored copy
#[derive(Debug)]
struct LoadedProgress {
    data: QuestProgressData,
    dirty: bool,
}

/// Cache slot for one player
#[derive(Debug)]
enum PlayerSlot {
    /// Nothing loaded yet, or the last load failed
    Unloaded,
    Loaded(LoadedProgress),
    /// Removed from the cache; whoever was waiting on it must look again
    Evicted,
}

/// Exclusive access to one player's progress
pub struct ProgressGuard {
    key: String,
    slot: OwnedMappedMutexGuard<PlayerSlot, LoadedProgress>,
}

impl ProgressGuard {
    pub fn data(&self) -> &QuestProgressData {
        &self.slot.data
    }

    /// Mutable access; the slot counts as unsaved until the next
    /// successful `persist`
    pub fn data_mut(&mut self) -> &mut QuestProgressData {
        self.slot.dirty = true;
        &mut self.slot.data
    }

    /// Lower-cased cache key
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct ProgressStore {
    repo: Arc<dyn ProgressRepository>,
    slots: DashMap<String, Arc<Mutex<PlayerSlot>>>,
    io_timeout: Duration,
}

impl ProgressStore {
    pub fn new(repo: Arc<dyn ProgressRepository>, io_timeout: Duration) -> Self {
        Self {
            repo,
            slots: DashMap::new(),
            io_timeout,
        }
    }

    fn cache_key(username: &str) -> String {
        username.to_lowercase()
    }

    /// Lock a player's progress, loading it on first access.
    ///
    /// A player with no stored progress starts with an empty aggregate.
    pub async fn lock(&self, username: &str) -> Result<ProgressGuard, StoreError> {
        let key = Self::cache_key(username);

        loop {
            let slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(PlayerSlot::Unloaded)))
                .value()
                .clone();

            let mut guard = slot.lock_owned().await;
            // Evicted while we waited; the map already holds a new slot
            if matches!(*guard, PlayerSlot::Evicted) {
                continue;
            }
            if matches!(*guard, PlayerSlot::Unloaded) {
                let data = match self.load(username).await? {
                    Some(data) => data,
                    None => {
                        debug!("No stored quest progress for {}, starting fresh", username);
                        QuestProgressData::new(username)
                    }
                };
                *guard = PlayerSlot::Loaded(LoadedProgress { data, dirty: false });
            }

            let slot = OwnedMutexGuard::try_map(guard, |slot| match slot {
                PlayerSlot::Loaded(loaded) => Some(loaded),
                PlayerSlot::Unloaded | PlayerSlot::Evicted => None,
            })
            .map_err(|_| {
                StoreError::Unavailable(format!("progress for {} was not loaded", username))
            })?;

            return Ok(ProgressGuard { key, slot });
        }
    }

    async fn load(&self, username: &str) -> Result<Option<QuestProgressData>, StoreError> {
        let result = tokio::time::timeout(self.io_timeout, self.repo.find_by_username(username))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout_ms()))
            .and_then(|r| r);

        if let Err(e) = &result {
            warn!("Failed to load quest progress for {}: {}", username, e);
        }
        result
    }

    async fn write(&self, key: &str, data: &mut QuestProgressData) -> Result<(), StoreError> {
        data.touch(Utc::now());

        let result = tokio::time::timeout(self.io_timeout, self.repo.save(data))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout_ms()))
            .and_then(|r| r);

        match &result {
            Ok(()) => debug!("Saved quest progress for {}", key),
            Err(e) => warn!("Failed to save quest progress for {}: {}", key, e),
        }
        result
    }

    /// Write the guarded progress through to the repository.
    ///
    /// On failure the cached progress is left as is; it is still the
    /// newest state and the next successful write will carry it.
    pub async fn persist(&self, guard: &mut ProgressGuard) -> Result<(), StoreError> {
        let loaded = &mut *guard.slot;
        self.write(&guard.key, &mut loaded.data).await?;
        loaded.dirty = false;
        Ok(())
    }

    /// Drop a cached player, e.g. on logout. Returns whether one was cached.
    ///
    /// Waits for the player's lock and writes unsaved progress first. If
    /// that write fails the player stays cached and the error is returned.
    pub async fn evict(&self, username: &str) -> Result<bool, StoreError> {
        let key = Self::cache_key(username);
        let Some(slot) = self.slots.get(&key).map(|entry| entry.value().clone()) else {
            return Ok(false);
        };

        let mut guard = slot.clone().lock_owned().await;
        match &mut *guard {
            PlayerSlot::Evicted => return Ok(false),
            PlayerSlot::Loaded(loaded) if loaded.dirty => {
                self.write(&key, &mut loaded.data).await?;
                loaded.dirty = false;
            }
            PlayerSlot::Loaded(_) | PlayerSlot::Unloaded => {}
        }

        self.slots.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        *guard = PlayerSlot::Evicted;
        info!("Evicted quest progress for {}", key);
        Ok(true)
    }

    pub fn is_cached(&self, username: &str) -> bool {
        self.slots.contains_key(&Self::cache_key(username))
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.io_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
