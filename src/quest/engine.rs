//! Quest Progression Engine
//!
//! Owns the quest/step state machine. Every mutating operation takes the
//! player's progress lock from the store, applies the change in place,
//! writes it through, then publishes lifecycle notifications.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::catalog::{CatalogHandle, QuestCatalog};
use super::definition::{
    ObjectiveKind, QuestDefinition, QuestObjective, QuestRewards, QuestStep, StepDialogue,
};
use super::dialogue::{self, DialogueChoice};
use super::events::{
    EventPayload, GameEvent, ObjectiveUpdate, QuestNotification, UpdateResult, NPC_TALKED,
};
use super::matcher::{self, ProgressAmount};
use super::prerequisites::{self, Eligibility, PlayerSnapshot};
use super::state::{ActiveQuestState, QuestProgressData, QuestStatus};
use crate::config::EngineConfig;
use crate::error::QuestError;
use crate::store::{ProgressGuard, ProgressRepository, ProgressStore};

/// Options for `start_quest`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Skip the eligibility checks (admin/scripted starts)
    pub force: bool,
    /// Step to start on instead of the first one
    pub starting_step: Option<String>,
}

/// What a finished quest hands back to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct QuestCompletion {
    pub quest_id: String,
    pub completion_count: u32,
    pub rewards: Option<QuestRewards>,
}

/// Dialogue an NPC offers because of a player's current step
#[derive(Debug, Clone)]
pub struct QuestDialogue {
    pub quest_id: String,
    pub step_id: String,
    pub dialogue: StepDialogue,
}

pub struct QuestEngine {
    catalog: Arc<CatalogHandle>,
    store: ProgressStore,
    notifier: broadcast::Sender<QuestNotification>,
}

impl QuestEngine {
    pub fn new(
        catalog: Arc<CatalogHandle>,
        repo: Arc<dyn ProgressRepository>,
        config: &EngineConfig,
    ) -> Self {
        let (notifier, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            catalog,
            store: ProgressStore::new(repo, Duration::from_millis(config.persistence_timeout_ms)),
            notifier,
        }
    }

    /// Receive lifecycle notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QuestNotification> {
        self.notifier.subscribe()
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Swap in a new catalog. Active quests missing from it are left alone
    /// and simply stop progressing.
    pub async fn reload_catalog(&self, catalog: QuestCatalog) {
        self.catalog.replace(catalog).await;
    }

    fn publish(&self, notifications: Vec<QuestNotification>) {
        for notification in notifications {
            debug!(
                "{} for {} ({})",
                notification.name(),
                notification.username(),
                notification.quest_id()
            );
            // No subscribers is fine
            let _ = self.notifier.send(notification);
        }
    }

    async fn lock(&self, username: &str) -> Result<ProgressGuard, QuestError> {
        Ok(self.store.lock(username).await?)
    }

    /// Copy of a player's current progress
    pub async fn get_progress(&self, username: &str) -> Result<QuestProgressData, QuestError> {
        let guard = self.lock(username).await?;
        Ok(guard.data().clone())
    }

    /// Where a player stands on one quest
    pub async fn quest_status(
        &self,
        username: &str,
        quest_id: &str,
    ) -> Result<QuestStatus, QuestError> {
        let guard = self.lock(username).await?;
        Ok(guard.data().status(quest_id))
    }

    /// Forget a player's cached progress (logout).
    ///
    /// Unsaved progress is written first; if that fails the player stays
    /// cached and the error is returned.
    pub async fn evict(&self, username: &str) -> Result<bool, QuestError> {
        Ok(self.store.evict(username).await?)
    }

    // ========================================================================
    // Eligibility
    // ========================================================================

    fn check_can_start(
        player: &PlayerSnapshot,
        quest: &QuestDefinition,
        progress: &QuestProgressData,
        now: DateTime<Utc>,
    ) -> Result<(), QuestError> {
        if progress.is_quest_active(&quest.id) {
            return Err(QuestError::AlreadyActive);
        }

        if let Some(record) = progress.completed_record(&quest.id) {
            if !quest.repeatable {
                return Err(QuestError::AlreadyCompleted);
            }
            if let Some(cooldown) = quest.repeat_cooldown_secs {
                let elapsed = (now - record.completed_at).num_seconds();
                if elapsed < cooldown {
                    return Err(QuestError::OnCooldown {
                        remaining_secs: cooldown - elapsed,
                    });
                }
            }
        }

        prerequisites::evaluate(player, quest, progress).map_err(QuestError::PrerequisitesNotMet)
    }

    /// Whether `player` could start `quest_id` right now.
    ///
    /// Only storage failures are returned as errors; rule failures come
    /// back as an ineligible verdict carrying the user-facing reason.
    pub async fn can_start_quest(
        &self,
        player: &PlayerSnapshot,
        quest_id: &str,
    ) -> Result<Eligibility, QuestError> {
        let Some(quest) = self.catalog.get(quest_id).await else {
            return Ok(Eligibility::ineligible(QuestError::NotFound.to_string()));
        };

        let guard = self.lock(&player.username).await?;
        match Self::check_can_start(player, &quest, guard.data(), Utc::now()) {
            Ok(()) => Ok(Eligibility::eligible()),
            Err(e) => Ok(Eligibility::ineligible(e.to_string())),
        }
    }

    /// Quests the player could start right now, sorted by ID
    pub async fn get_available_quests(
        &self,
        player: &PlayerSnapshot,
    ) -> Result<Vec<Arc<QuestDefinition>>, QuestError> {
        let catalog = self.catalog.snapshot().await;
        let guard = self.lock(&player.username).await?;
        let now = Utc::now();

        let mut available: Vec<Arc<QuestDefinition>> = catalog
            .all()
            .filter(|quest| Self::check_can_start(player, quest, guard.data(), now).is_ok())
            .cloned()
            .collect();
        available.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(available)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Activate a quest for a player
    pub async fn start_quest(
        &self,
        player: &PlayerSnapshot,
        quest_id: &str,
        options: StartOptions,
    ) -> Result<ActiveQuestState, QuestError> {
        let quest = self.catalog.get(quest_id).await.ok_or(QuestError::NotFound)?;
        let mut guard = self.lock(&player.username).await?;
        let now = Utc::now();

        if !options.force {
            Self::check_can_start(player, &quest, guard.data(), now)?;
        }

        let step = match options.starting_step.as_deref() {
            Some(step_id) => quest.step(step_id),
            None => quest.first_step(),
        }
        .ok_or(QuestError::InvalidStep)?;

        let state = ActiveQuestState::new(&quest, step, now);

        // Forced starts skip the checks above but never duplicate an instance
        if guard.data().is_quest_active(quest_id) {
            return Err(QuestError::AlreadyActive);
        }
        guard.data_mut().active_quests.push(state.clone());

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);

        info!("Player {} started quest {} at step {}", player.username, quest_id, step.id);
        self.publish(vec![QuestNotification::Started {
            username: player.username.clone(),
            quest_id: quest_id.to_string(),
            step_id: step.id.clone(),
            actions: step.on_start.clone(),
        }]);

        persisted?;
        Ok(state)
    }

    /// Drop an active quest without recording anything.
    ///
    /// Returns false when the quest was not active.
    pub async fn abandon_quest(&self, username: &str, quest_id: &str) -> Result<bool, QuestError> {
        let mut guard = self.lock(username).await?;
        if guard.data_mut().take_active(quest_id).is_none() {
            return Ok(false);
        }

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);

        info!("Player {} abandoned quest {}", username, quest_id);
        self.publish(vec![QuestNotification::Abandoned {
            username: username.to_string(),
            quest_id: quest_id.to_string(),
        }]);

        persisted?;
        Ok(true)
    }

    /// Finish an active quest and hand back its rewards.
    ///
    /// Returns `None` when the quest was not active.
    pub async fn complete_quest(
        &self,
        username: &str,
        quest_id: &str,
    ) -> Result<Option<QuestCompletion>, QuestError> {
        let rewards = self
            .catalog
            .get(quest_id)
            .await
            .and_then(|q| q.rewards.clone());

        let mut guard = self.lock(username).await?;
        let mut outbox = Vec::new();
        let Some(completion) = Self::finish_quest(
            guard.data_mut(),
            username,
            quest_id,
            rewards,
            Utc::now(),
            &mut outbox,
        ) else {
            return Ok(None);
        };

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);
        self.publish(outbox);

        persisted?;
        Ok(Some(completion))
    }

    /// Move an active quest into the failure history.
    ///
    /// Returns false when the quest was not active.
    pub async fn fail_quest(
        &self,
        username: &str,
        quest_id: &str,
        reason: Option<&str>,
    ) -> Result<bool, QuestError> {
        let mut guard = self.lock(username).await?;
        let data = guard.data_mut();
        if data.take_active(quest_id).is_none() {
            return Ok(false);
        }
        data.record_failure(quest_id, reason.map(str::to_string), Utc::now());

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);

        info!("Player {} failed quest {}", username, quest_id);
        self.publish(vec![QuestNotification::Failed {
            username: username.to_string(),
            quest_id: quest_id.to_string(),
            reason: reason.map(str::to_string),
        }]);

        persisted?;
        Ok(true)
    }

    /// Remove the active instance and record the completion
    fn finish_quest(
        data: &mut QuestProgressData,
        username: &str,
        quest_id: &str,
        rewards: Option<QuestRewards>,
        now: DateTime<Utc>,
        outbox: &mut Vec<QuestNotification>,
    ) -> Option<QuestCompletion> {
        data.take_active(quest_id)?;
        let completion_count = data.record_completion(quest_id, now);

        info!(
            "Player {} completed quest {} (x{})",
            username, quest_id, completion_count
        );
        outbox.push(QuestNotification::Completed {
            username: username.to_string(),
            quest_id: quest_id.to_string(),
            completion_count,
            rewards: rewards.clone(),
        });

        Some(QuestCompletion {
            quest_id: quest_id.to_string(),
            completion_count,
            rewards,
        })
    }

    // ========================================================================
    // Progress
    // ========================================================================

    /// Feed a game event to every active quest of a player
    pub async fn update_objective(
        &self,
        username: &str,
        event_name: &str,
        payload: &EventPayload,
    ) -> Result<Vec<UpdateResult>, QuestError> {
        self.advance(username, |objective| {
            matcher::matches(objective, event_name, payload)
                .then(|| matcher::progress_amount(objective, payload))
        })
        .await
    }

    /// Typed convenience wrapper over `update_objective`
    pub async fn ingest(
        &self,
        username: &str,
        event: &GameEvent,
    ) -> Result<Vec<UpdateResult>, QuestError> {
        self.update_objective(username, event.name(), &event.payload()).await
    }

    /// Re-check state-based objectives against the player snapshot:
    /// `have_item` against inventory, `have_flag` against flags and
    /// `reach_level` against the current level, for players who were
    /// already past the target when the step began
    pub async fn poll_objectives(
        &self,
        player: &PlayerSnapshot,
    ) -> Result<Vec<UpdateResult>, QuestError> {
        self.advance(&player.username, |objective| match &objective.kind {
            ObjectiveKind::HaveItem { item_id } => {
                Some(ProgressAmount::Observed(player.item_count(item_id)))
            }
            ObjectiveKind::HaveFlag { flag } => player
                .has_any_flag(flag)
                .then_some(ProgressAmount::Observed(objective.required_count())),
            ObjectiveKind::ReachLevel { level } => {
                (player.level >= *level).then_some(ProgressAmount::Observed(player.level))
            }
            _ => None,
        })
        .await
    }

    /// Shared driver for event and poll updates. Persists once, and only
    /// when something progressed.
    async fn advance<F>(
        &self,
        username: &str,
        amount_for: F,
    ) -> Result<Vec<UpdateResult>, QuestError>
    where
        F: FnMut(&QuestObjective) -> Option<ProgressAmount>,
    {
        let catalog = self.catalog.snapshot().await;
        let mut guard = self.lock(username).await?;
        let mut outbox = Vec::new();

        let results = Self::apply_progress(
            &catalog,
            guard.data_mut(),
            username,
            Utc::now(),
            &mut outbox,
            amount_for,
        );

        if results.is_empty() {
            return Ok(results);
        }

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);
        self.publish(outbox);

        persisted?;
        Ok(results)
    }

    /// Walk every active quest's current step, bump the objectives
    /// `amount_for` selects, then settle step and quest completion.
    fn apply_progress<F>(
        catalog: &QuestCatalog,
        data: &mut QuestProgressData,
        username: &str,
        now: DateTime<Utc>,
        outbox: &mut Vec<QuestNotification>,
        mut amount_for: F,
    ) -> Vec<UpdateResult>
    where
        F: FnMut(&QuestObjective) -> Option<ProgressAmount>,
    {
        let mut results = Vec::new();
        let quest_ids: Vec<String> = data
            .active_quests
            .iter()
            .map(|q| q.quest_id.clone())
            .collect();

        for quest_id in quest_ids {
            let Some(quest) = catalog.get(&quest_id) else {
                debug!("Active quest {} is not in the catalog, skipping", quest_id);
                continue;
            };
            let Some(active) = data.active_mut(&quest_id) else {
                continue;
            };
            let Some(step) = quest.step(&active.current_step_id) else {
                warn!(
                    "Quest {} for {} is on unknown step {}",
                    quest_id, username, active.current_step_id
                );
                continue;
            };

            let mut result = UpdateResult::new(&quest_id, &step.id);

            // Every objective sees the event before the step is judged
            let step_done = {
                let step_progress = active.current_step_mut(step, now);
                if step_progress.completed {
                    continue;
                }

                for objective in &step.objectives {
                    let Some(amount) = amount_for(objective) else {
                        continue;
                    };

                    let progress =
                        step_progress.objective_mut(&objective.id, objective.required_count());
                    let (changed, newly_completed) = match amount {
                        ProgressAmount::Increment(n) if !progress.completed => {
                            (true, progress.add_progress(n))
                        }
                        ProgressAmount::Increment(_) => (false, false),
                        ProgressAmount::Observed(n) => progress.observe(n),
                    };
                    if !changed {
                        continue;
                    }

                    debug!(
                        "Player {} progress on objective {} for quest {}: {}/{}",
                        username, objective.id, quest_id, progress.current, progress.required
                    );
                    result.objectives.push(ObjectiveUpdate {
                        objective_id: objective.id.clone(),
                        current: progress.current,
                        required: progress.required,
                        completed: progress.completed,
                    });
                    result.objective_completed |= newly_completed;
                    outbox.push(QuestNotification::ObjectiveUpdated {
                        username: username.to_string(),
                        quest_id: quest_id.clone(),
                        step_id: step.id.clone(),
                        objective_id: objective.id.clone(),
                        current: progress.current,
                        required: progress.required,
                        completed: progress.completed,
                    });
                }

                let done = result.objective_completed && step_progress.is_satisfied(step);
                if done {
                    step_progress.complete(now);
                }
                done
            };

            if !result.has_progress() {
                continue;
            }

            if step_done {
                result.step_completed = true;
                let next = quest.next_step(&step.id);
                let mut actions = step.on_complete.clone();

                if let Some(next) = next {
                    actions.extend(next.on_start.iter().cloned());
                    active.enter_step(next, now);
                    result.next_step_id = Some(next.id.clone());
                    info!(
                        "Player {} finished step {} of quest {}, now on {}",
                        username, step.id, quest_id, next.id
                    );
                }

                outbox.push(QuestNotification::StepCompleted {
                    username: username.to_string(),
                    quest_id: quest_id.clone(),
                    step_id: step.id.clone(),
                    next_step_id: result.next_step_id.clone(),
                    actions,
                });

                if next.is_none() {
                    if let Some(completion) = Self::finish_quest(
                        data,
                        username,
                        &quest_id,
                        quest.rewards.clone(),
                        now,
                        outbox,
                    ) {
                        result.quest_completed = true;
                        result.rewards = completion.rewards;
                    }
                }
            }

            results.push(result);
        }

        results
    }

    // ========================================================================
    // Branching and variables
    // ========================================================================

    /// Jump an active quest to `step_id`.
    ///
    /// The step being left only pays out its on-complete actions when its
    /// objectives are actually met.
    pub async fn advance_to_step(
        &self,
        username: &str,
        quest_id: &str,
        step_id: &str,
    ) -> Result<(), QuestError> {
        let quest = self.catalog.get(quest_id).await.ok_or(QuestError::NotFound)?;
        let target = quest.step(step_id).ok_or(QuestError::InvalidStep)?;

        let mut guard = self.lock(username).await?;
        let mut outbox = Vec::new();
        let active = guard.data_mut().active_mut(quest_id).ok_or(QuestError::NotActive)?;
        let origin = active.current_step_id.clone();
        Self::branch_to(&quest, active, target, &origin, username, Utc::now(), &mut outbox);

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);
        self.publish(outbox);

        persisted?;
        Ok(())
    }

    /// Move `active` from its current step onto `target`.
    ///
    /// The left step is marked completed, and its on-complete actions are
    /// handed out, only when its completion policy holds and it is still
    /// `origin_step_id`, the step the calling operation started on. A step
    /// entered earlier in the same operation never pays out.
    fn branch_to(
        quest: &QuestDefinition,
        active: &mut ActiveQuestState,
        target: &QuestStep,
        origin_step_id: &str,
        username: &str,
        now: DateTime<Utc>,
        outbox: &mut Vec<QuestNotification>,
    ) {
        let from_step_id = active.current_step_id.clone();
        let mut actions = Vec::new();

        if let Some(from) = quest.step(&from_step_id) {
            let progress = active.current_step_mut(from, now);
            let earned = from_step_id == origin_step_id
                && !progress.completed
                && progress.is_satisfied(from);
            if earned {
                progress.complete(now);
                actions.extend(from.on_complete.iter().cloned());
            }
        }
        actions.extend(target.on_start.iter().cloned());
        active.enter_step(target, now);

        info!(
            "Player {} branched quest {} from {} to {}",
            username, quest.id, from_step_id, target.id
        );
        outbox.push(QuestNotification::StepCompleted {
            username: username.to_string(),
            quest_id: quest.id.clone(),
            step_id: from_step_id,
            next_step_id: Some(target.id.clone()),
            actions,
        });
    }

    /// Store a quest-scoped variable on an active quest
    pub async fn set_quest_variable(
        &self,
        username: &str,
        quest_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), QuestError> {
        let mut guard = self.lock(username).await?;
        guard
            .data_mut()
            .active_mut(quest_id)
            .ok_or(QuestError::NotActive)?
            .set_variable(key, value);

        self.store.persist(&mut guard).await?;
        Ok(())
    }

    // ========================================================================
    // Dialogue
    // ========================================================================

    /// Dialogue entries the NPC has for the player's current steps
    pub async fn get_quest_dialogues(
        &self,
        username: &str,
        npc_template_id: &str,
    ) -> Result<Vec<QuestDialogue>, QuestError> {
        let catalog = self.catalog.snapshot().await;
        let guard = self.lock(username).await?;

        let dialogues = guard
            .data()
            .active_quests
            .iter()
            .filter_map(|active| {
                let quest = catalog.get(&active.quest_id)?;
                let step = quest.step(&active.current_step_id)?;
                let dialogue = step.dialogues.get(npc_template_id)?;
                Some(QuestDialogue {
                    quest_id: active.quest_id.clone(),
                    step_id: step.id.clone(),
                    dialogue: dialogue.clone(),
                })
            })
            .collect();

        Ok(dialogues)
    }

    /// Quest dialogues for `npc_template_id` with the options the player
    /// does not qualify for removed
    pub async fn available_dialogues(
        &self,
        player: &PlayerSnapshot,
        npc_template_id: &str,
    ) -> Result<Vec<QuestDialogue>, QuestError> {
        let catalog = self.catalog.snapshot().await;
        let guard = self.lock(&player.username).await?;
        let progress = guard.data();

        let dialogues = progress
            .active_quests
            .iter()
            .filter_map(|active| {
                let quest = catalog.get(&active.quest_id)?;
                let step = quest.step(&active.current_step_id)?;
                let mut offered = step.dialogues.get(npc_template_id)?.clone();
                offered
                    .options
                    .retain(|option| dialogue::is_option_available(player, progress, option));
                Some(QuestDialogue {
                    quest_id: active.quest_id.clone(),
                    step_id: step.id.clone(),
                    dialogue: offered,
                })
            })
            .collect();

        Ok(dialogues)
    }

    /// Pick `option_id` from the NPC's dialogue for `quest_id`.
    ///
    /// Reports the talk as `npc:talked`, then follows the option's branch
    /// if the quest is still active. Both happen under one lock and are
    /// written once. Returns `None` when the option is not offered to this
    /// player right now.
    pub async fn choose_option(
        &self,
        player: &PlayerSnapshot,
        npc_template_id: &str,
        quest_id: &str,
        option_id: &str,
    ) -> Result<Option<DialogueChoice>, QuestError> {
        let catalog = self.catalog.snapshot().await;
        let mut guard = self.lock(&player.username).await?;

        let offered = catalog.get(quest_id).and_then(|quest| {
            let progress = guard.data();
            let active = progress.active(quest_id)?;
            let option = quest
                .step(&active.current_step_id)?
                .dialogues
                .get(npc_template_id)?
                .options
                .iter()
                .find(|o| o.id == option_id)?;
            dialogue::is_option_available(player, progress, option).then(|| {
                (quest.clone(), active.current_step_id.clone(), option.clone())
            })
        });
        let Some((quest, origin, option)) = offered else {
            debug!(
                "Option {} of {} not available to {}",
                option_id, npc_template_id, player.username
            );
            return Ok(None);
        };

        let now = Utc::now();
        let mut outbox = Vec::new();
        let payload = EventPayload::new()
            .with("npcTemplateId", npc_template_id)
            .with("dialogueOption", option_id);
        let updates = Self::apply_progress(
            &catalog,
            guard.data_mut(),
            &player.username,
            now,
            &mut outbox,
            |objective| {
                matcher::matches(objective, NPC_TALKED, &payload)
                    .then(|| matcher::progress_amount(objective, &payload))
            },
        );

        let mut advanced_to = None;
        let mut branched = false;
        let target = option.advance_to_step.as_deref().and_then(|id| quest.step(id));
        // Finished by the talk itself when no longer active
        if let (Some(target), Some(active)) = (target, guard.data_mut().active_mut(quest_id)) {
            if active.current_step_id != target.id {
                Self::branch_to(
                    &quest,
                    active,
                    target,
                    &origin,
                    &player.username,
                    now,
                    &mut outbox,
                );
                branched = true;
            }
            advanced_to = Some(target.id.clone());
        }

        let choice = DialogueChoice {
            actions: option.actions,
            updates,
            advanced_to,
        };
        if choice.updates.is_empty() && !branched {
            return Ok(Some(choice));
        }

        let persisted = self.store.persist(&mut guard).await;
        drop(guard);
        self.publish(outbox);

        persisted?;
        Ok(Some(choice))
    }
}
