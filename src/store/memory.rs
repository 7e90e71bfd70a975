//! In-memory progress repository for tests and local runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::ProgressRepository;
use crate::error::StoreError;
use crate::quest::state::QuestProgressData;

#[derive(Debug, Default)]
pub struct InMemoryProgressRepository {
    records: DashMap<String, QuestProgressData>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryProgressRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail until switched back off
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last successfully saved copy for a player
    pub fn stored(&self, username: &str) -> Option<QuestProgressData> {
        self.records.get(&username.to_lowercase()).map(|r| r.clone())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryProgressRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<QuestProgressData>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up behind the load
        tokio::task::yield_now().await;
        Ok(self.stored(username))
    }

    async fn save(&self, data: &QuestProgressData) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves disabled".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .insert(data.username.to_lowercase(), data.clone());
        Ok(())
    }
}
