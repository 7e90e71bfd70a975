//! Quest Catalog
//!
//! Immutable table of quest definitions, plus the handle the engine reads
//! it through. A reload builds a whole new table and swaps it in, so
//! readers always see either the old catalog or the new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use super::definition::QuestDefinition;
use crate::error::CatalogError;

/// Quest file layout on disk: one `[quest]` table per file
#[derive(Debug, Deserialize)]
struct QuestFile {
    quest: QuestDefinition,
}

/// Read-only quest definitions keyed by quest ID
#[derive(Debug, Default)]
pub struct QuestCatalog {
    quests: HashMap<String, Arc<QuestDefinition>>,
}

impl QuestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-validated definitions
    pub fn from_quests(quests: impl IntoIterator<Item = QuestDefinition>) -> Self {
        let quests = quests
            .into_iter()
            .map(|q| (q.id.clone(), Arc::new(q)))
            .collect();
        Self { quests }
    }

    /// Load every `.toml` quest file under `dir`, recursively.
    ///
    /// Files that fail to parse or validate are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        info!("Loading quests from {:?}", dir);

        let mut catalog = Self::new();
        if !dir.exists() {
            warn!("Quest directory does not exist: {:?}", dir);
            return Ok(catalog);
        }

        let mut paths = Vec::new();
        collect_toml_files(dir, &mut paths)?;
        paths.sort();

        for path in paths {
            match load_quest_file(&path) {
                Ok(quest) => {
                    if catalog.quests.contains_key(&quest.id) {
                        warn!("Duplicate quest ID '{}' in {:?}, overwriting", quest.id, path);
                    }
                    info!("Loaded quest: {} ({})", quest.name, quest.id);
                    catalog.quests.insert(quest.id.clone(), Arc::new(quest));
                }
                Err(e) => warn!("Failed to load quest {:?}: {}", path, e),
            }
        }

        catalog.warn_dangling_chains();
        info!("Loaded {} quest definitions", catalog.len());
        Ok(catalog)
    }

    fn warn_dangling_chains(&self) {
        for quest in self.quests.values() {
            let Some(chain) = &quest.chain else { continue };
            let refs = [
                ("previous", &chain.previous),
                ("next", &chain.next),
                ("branch_from", &chain.branch_from),
            ];
            for (label, target) in refs {
                if let Some(target) = target {
                    if !self.quests.contains_key(target) {
                        warn!(
                            "Quest '{}' references non-existent {} quest '{}'",
                            quest.id, label, target
                        );
                    }
                }
            }
        }
    }

    pub fn get(&self, quest_id: &str) -> Option<&Arc<QuestDefinition>> {
        self.quests.get(quest_id)
    }

    pub fn contains(&self, quest_id: &str) -> bool {
        self.quests.contains_key(quest_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<QuestDefinition>> {
        self.quests.values()
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: dir.display().to_string(),
        source,
    };

    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    Ok(())
}

fn load_quest_file(path: &Path) -> Result<QuestDefinition, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let file: QuestFile = toml::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    file.quest.validate().map_err(|reason| CatalogError::Invalid {
        quest_id: file.quest.id.clone(),
        reason,
    })?;

    Ok(file.quest)
}

/// Shared pointer to the current catalog
#[derive(Debug, Default)]
pub struct CatalogHandle {
    current: RwLock<Arc<QuestCatalog>>,
}

impl CatalogHandle {
    pub fn new(catalog: QuestCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The catalog as of now; unaffected by later reloads
    pub async fn snapshot(&self) -> Arc<QuestCatalog> {
        self.current.read().await.clone()
    }

    pub async fn get(&self, quest_id: &str) -> Option<Arc<QuestDefinition>> {
        self.current.read().await.get(quest_id).cloned()
    }

    /// Swap in a whole new catalog
    pub async fn replace(&self, catalog: QuestCatalog) {
        let count = catalog.len();
        *self.current.write().await = Arc::new(catalog);
        info!("Quest catalog replaced ({} quests)", count);
    }
}

/// Events from the hot-reload watcher
#[derive(Debug, Clone)]
pub enum HotReloadEvent {
    /// The catalog was rebuilt after a change to this file
    Reloaded(String),
    /// Rebuilding the catalog failed; the previous one stays in place
    Error(String),
}

/// Watch a quest directory and swap a freshly loaded catalog into `handle`
/// whenever a `.toml` file changes.
///
/// Must be called from within a tokio runtime.
pub fn start_file_watcher(
    handle: Arc<CatalogHandle>,
    dir: PathBuf,
) -> Result<mpsc::Receiver<HotReloadEvent>, CatalogError> {
    use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
    use std::time::Duration;

    let (tx, rx) = mpsc::channel(32);
    let rt = tokio::runtime::Handle::current();
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = notify_tx.send(event);
            }
        },
        Config::default().with_poll_interval(Duration::from_secs(1)),
    )?;

    watcher.watch(&dir, RecursiveMode::Recursive)?;

    info!("Quest hot-reload watcher started for {:?}", dir);

    std::thread::spawn(move || {
        // The watcher stops when dropped, so it lives on this thread
        let _watcher = watcher;

        while let Ok(event) = notify_rx.recv() {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }

            let Some(path) = event
                .paths
                .iter()
                .find(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .cloned()
            else {
                continue;
            };

            info!("Detected change in {:?}, triggering reload", path);

            let handle = Arc::clone(&handle);
            let tx = tx.clone();
            let dir = dir.clone();
            rt.spawn(async move {
                match QuestCatalog::load_dir(&dir) {
                    Ok(catalog) => {
                        handle.replace(catalog).await;
                        let _ = tx
                            .send(HotReloadEvent::Reloaded(path.to_string_lossy().to_string()))
                            .await;
                    }
                    Err(e) => {
                        tracing::error!("Hot-reload failed: {}", e);
                        let _ = tx.send(HotReloadEvent::Error(e.to_string())).await;
                    }
                }
            });
        }
    });

    Ok(rx)
}
