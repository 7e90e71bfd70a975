//! Quest State Tracking
//!
//! Per-player quest progress: active quests with per-step objective counts,
//! completed history and failures. This is the aggregate the progress store
//! persists.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::{QuestDefinition, QuestStep};

/// Lifecycle status of a quest for a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Unstarted,
    Active,
    Completed,
    Failed,
}

/// Progress on a single objective
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveProgress {
    pub current: u32,
    pub required: u32,
    pub completed: bool,
}

impl ObjectiveProgress {
    pub fn new(required: u32) -> Self {
        Self {
            current: 0,
            required: required.max(1),
            completed: false,
        }
    }

    /// Add progress and return true if newly completed.
    ///
    /// A completed objective is never touched again.
    pub fn add_progress(&mut self, amount: u32) -> bool {
        if self.completed {
            return false;
        }
        self.current = self.current.saturating_add(amount).min(self.required);
        self.check_complete()
    }

    /// Raise progress to an observed amount; never lowers it.
    ///
    /// Returns (changed, newly_completed).
    pub fn observe(&mut self, amount: u32) -> (bool, bool) {
        if self.completed {
            return (false, false);
        }
        let amount = amount.min(self.required);
        if amount <= self.current {
            return (false, false);
        }
        self.current = amount;
        (true, self.check_complete())
    }

    fn check_complete(&mut self) -> bool {
        if self.current >= self.required {
            self.completed = true;
            true
        } else {
            false
        }
    }
}

/// Progress within one step of an active quest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Keyed by objective ID
    pub objectives: HashMap<String, ObjectiveProgress>,
}

impl StepProgress {
    /// Fresh progress with one entry per objective in the step
    pub fn for_step(step: &QuestStep, now: DateTime<Utc>) -> Self {
        let objectives = step
            .objectives
            .iter()
            .map(|o| (o.id.clone(), ObjectiveProgress::new(o.required_count())))
            .collect();

        Self {
            completed: false,
            started_at: now,
            completed_at: None,
            objectives,
        }
    }

    /// Progress entry for an objective, created if the step gained it
    /// after this progress was recorded
    pub fn objective_mut(&mut self, objective_id: &str, required: u32) -> &mut ObjectiveProgress {
        self.objectives
            .entry(objective_id.to_string())
            .or_insert_with(|| ObjectiveProgress::new(required))
    }

    /// Evaluate the step's completion policy against recorded progress
    pub fn is_satisfied(&self, step: &QuestStep) -> bool {
        let mut done = step.objectives.iter().map(|o| {
            self.objectives
                .get(&o.id)
                .map(|p| p.completed)
                .unwrap_or(false)
        });

        if step.require_all_objectives {
            done.all(|d| d)
        } else {
            done.any(|d| d)
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(now);
    }
}

/// One player's run through one quest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveQuestState {
    pub quest_id: String,
    pub current_step_id: String,
    pub started_at: DateTime<Utc>,
    /// Keyed by step ID
    pub step_progress: HashMap<String, StepProgress>,
    /// Quest-scoped variables
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
}

impl ActiveQuestState {
    /// Start a quest at `step`, seeding progress for that step
    pub fn new(quest: &QuestDefinition, step: &QuestStep, now: DateTime<Utc>) -> Self {
        let mut step_progress = HashMap::new();
        step_progress.insert(step.id.clone(), StepProgress::for_step(step, now));

        Self {
            quest_id: quest.id.clone(),
            current_step_id: step.id.clone(),
            started_at: now,
            step_progress,
            variables: HashMap::new(),
        }
    }

    /// Progress for the current step, lazily created if missing
    pub fn current_step_mut(&mut self, step: &QuestStep, now: DateTime<Utc>) -> &mut StepProgress {
        self.step_progress
            .entry(self.current_step_id.clone())
            .or_insert_with(|| StepProgress::for_step(step, now))
    }

    /// Make `step` current with fresh progress
    pub fn enter_step(&mut self, step: &QuestStep, now: DateTime<Utc>) {
        self.current_step_id = step.id.clone();
        self.step_progress
            .insert(step.id.clone(), StepProgress::for_step(step, now));
    }

    pub fn objective(&self, step_id: &str, objective_id: &str) -> Option<&ObjectiveProgress> {
        self.step_progress.get(step_id)?.objectives.get(objective_id)
    }

    pub fn variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    pub fn set_variable(&mut self, key: &str, value: serde_json::Value) {
        self.variables.insert(key.to_string(), value);
    }
}

/// Completion history entry for a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedQuestRecord {
    pub quest_id: String,
    pub completed_at: DateTime<Utc>,
    pub completion_count: u32,
}

/// Failure history entry for a quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQuestRecord {
    pub quest_id: String,
    pub failed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// All quest state for a single player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestProgressData {
    pub username: String,
    #[serde(default)]
    pub active_quests: Vec<ActiveQuestState>,
    #[serde(default)]
    pub completed_quests: Vec<CompletedQuestRecord>,
    #[serde(default)]
    pub failed_quests: Vec<FailedQuestRecord>,
    pub last_updated: DateTime<Utc>,
}

impl QuestProgressData {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            active_quests: Vec::new(),
            completed_quests: Vec::new(),
            failed_quests: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn active(&self, quest_id: &str) -> Option<&ActiveQuestState> {
        self.active_quests.iter().find(|q| q.quest_id == quest_id)
    }

    pub fn active_mut(&mut self, quest_id: &str) -> Option<&mut ActiveQuestState> {
        self.active_quests.iter_mut().find(|q| q.quest_id == quest_id)
    }

    pub fn is_quest_active(&self, quest_id: &str) -> bool {
        self.active(quest_id).is_some()
    }

    pub fn completed_record(&self, quest_id: &str) -> Option<&CompletedQuestRecord> {
        self.completed_quests.iter().find(|r| r.quest_id == quest_id)
    }

    pub fn is_quest_completed(&self, quest_id: &str) -> bool {
        self.completed_record(quest_id).is_some()
    }

    pub fn status(&self, quest_id: &str) -> QuestStatus {
        if self.is_quest_active(quest_id) {
            QuestStatus::Active
        } else if self.is_quest_completed(quest_id) {
            QuestStatus::Completed
        } else if self.failed_quests.iter().any(|r| r.quest_id == quest_id) {
            QuestStatus::Failed
        } else {
            QuestStatus::Unstarted
        }
    }

    /// Remove and return the active instance of a quest
    pub fn take_active(&mut self, quest_id: &str) -> Option<ActiveQuestState> {
        let index = self.active_quests.iter().position(|q| q.quest_id == quest_id)?;
        Some(self.active_quests.remove(index))
    }

    /// Record a completion, bumping the count on repeats.
    ///
    /// Returns the new completion count.
    pub fn record_completion(&mut self, quest_id: &str, now: DateTime<Utc>) -> u32 {
        if let Some(record) = self.completed_quests.iter_mut().find(|r| r.quest_id == quest_id) {
            record.completion_count += 1;
            record.completed_at = now;
            return record.completion_count;
        }

        self.completed_quests.push(CompletedQuestRecord {
            quest_id: quest_id.to_string(),
            completed_at: now,
            completion_count: 1,
        });
        1
    }

    pub fn record_failure(&mut self, quest_id: &str, reason: Option<String>, now: DateTime<Utc>) {
        self.failed_quests.push(FailedQuestRecord {
            quest_id: quest_id.to_string(),
            failed_at: now,
            reason,
        });
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::{ObjectiveKind, QuestObjective};

    fn step(require_all: bool) -> QuestStep {
        QuestStep {
            id: "hunt".to_string(),
            name: "Hunt".to_string(),
            description: String::new(),
            objectives: vec![
                QuestObjective {
                    id: "wolves".to_string(),
                    description: String::new(),
                    count: Some(2),
                    kind: ObjectiveKind::KillMob { npc_template_id: "wolf".to_string() },
                },
                QuestObjective {
                    id: "bears".to_string(),
                    description: String::new(),
                    count: None,
                    kind: ObjectiveKind::KillMob { npc_template_id: "bear".to_string() },
                },
            ],
            dialogues: HashMap::new(),
            on_start: Vec::new(),
            on_complete: Vec::new(),
            require_all_objectives: require_all,
        }
    }

    #[test]
    fn test_objective_progress() {
        let mut obj = ObjectiveProgress::new(3);
        assert!(!obj.add_progress(1));
        assert!(!obj.add_progress(1));
        assert!(obj.add_progress(1));
        assert!(obj.completed);
        assert_eq!(obj.current, 3);

        // Can't add more after complete
        assert!(!obj.add_progress(1));
        assert_eq!(obj.current, 3);
    }

    #[test]
    fn test_observe_never_lowers() {
        let mut obj = ObjectiveProgress::new(5);
        assert_eq!(obj.observe(3), (true, false));
        assert_eq!(obj.observe(1), (false, false));
        assert_eq!(obj.current, 3);
        assert_eq!(obj.observe(9), (true, true));
        assert_eq!(obj.current, 5);
    }

    #[test]
    fn test_step_completion_policy() {
        let now = Utc::now();
        let all = step(true);
        let mut progress = StepProgress::for_step(&all, now);
        progress.objectives.get_mut("bears").unwrap().add_progress(1);
        assert!(!progress.is_satisfied(&all));

        let any = step(false);
        assert!(progress.is_satisfied(&any));
    }

    #[test]
    fn test_repeat_completion_keeps_single_record() {
        let now = Utc::now();
        let mut data = QuestProgressData::new("Alice");
        assert_eq!(data.record_completion("daily", now), 1);
        assert_eq!(data.record_completion("daily", now), 2);
        assert_eq!(data.completed_quests.len(), 1);
        assert_eq!(data.status("daily"), QuestStatus::Completed);
    }
}
