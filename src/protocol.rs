//! Host protocol: JSON-lines commands from the game server and the replies
//! the engine sends back.

use serde::{Deserialize, Serialize};

use crate::error::QuestError;
use crate::quest::definition::{QuestAction, QuestCategory, QuestRewards, StepDialogue};
use crate::quest::events::{EventPayload, QuestNotification, UpdateResult};
use crate::quest::prerequisites::PlayerSnapshot;
use crate::quest::state::{QuestProgressData, QuestStatus};
use crate::quest::{QuestEngine, StartOptions};

// ============================================================================
// Host -> Engine Commands
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum HostCommand {
    #[serde(rename = "startQuest")]
    StartQuest {
        player: PlayerSnapshot,
        quest_id: String,
        #[serde(default)]
        force: bool,
        #[serde(default)]
        starting_step: Option<String>,
    },

    #[serde(rename = "canStartQuest")]
    CanStartQuest { player: PlayerSnapshot, quest_id: String },

    #[serde(rename = "abandonQuest")]
    AbandonQuest { username: String, quest_id: String },

    #[serde(rename = "completeQuest")]
    CompleteQuest { username: String, quest_id: String },

    #[serde(rename = "failQuest")]
    FailQuest {
        username: String,
        quest_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// A game event such as `npc:death`
    #[serde(rename = "event")]
    Event {
        username: String,
        event: String,
        #[serde(default)]
        payload: EventPayload,
    },

    /// Re-check inventory and flag objectives
    #[serde(rename = "poll")]
    Poll { player: PlayerSnapshot },

    #[serde(rename = "availableQuests")]
    AvailableQuests { player: PlayerSnapshot },

    #[serde(rename = "dialogues")]
    Dialogues { player: PlayerSnapshot, npc_template_id: String },

    #[serde(rename = "chooseOption")]
    ChooseOption {
        player: PlayerSnapshot,
        npc_template_id: String,
        quest_id: String,
        option_id: String,
    },

    #[serde(rename = "advanceToStep")]
    AdvanceToStep { username: String, quest_id: String, step_id: String },

    #[serde(rename = "setVariable")]
    SetVariable {
        username: String,
        quest_id: String,
        key: String,
        value: serde_json::Value,
    },

    #[serde(rename = "progress")]
    Progress { username: String },

    #[serde(rename = "questStatus")]
    QuestStatus { username: String, quest_id: String },

    /// Player left; save and drop the cached progress
    #[serde(rename = "logout")]
    Logout { username: String },
}

// ============================================================================
// Engine -> Host Replies
// ============================================================================

/// Catalog entry as listed to players
#[derive(Debug, Clone, Serialize)]
pub struct QuestSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: QuestCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct DialogueView {
    pub quest_id: String,
    pub step_id: String,
    pub dialogue: StepDialogue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum HostReply {
    #[serde(rename = "questStarted")]
    QuestStarted { quest_id: String, step_id: String },

    #[serde(rename = "eligibility")]
    Eligibility { eligible: bool, reason: Option<String> },

    /// Result of an operation that may be a no-op
    #[serde(rename = "ack")]
    Ack { changed: bool },

    #[serde(rename = "questCompleted")]
    QuestCompleted {
        quest_id: String,
        completion_count: u32,
        rewards: Option<QuestRewards>,
    },

    #[serde(rename = "updates")]
    Updates { results: Vec<UpdateResult> },

    #[serde(rename = "availableQuests")]
    AvailableQuests { quests: Vec<QuestSummary> },

    #[serde(rename = "dialogues")]
    Dialogues { dialogues: Vec<DialogueView> },

    #[serde(rename = "dialogueChosen")]
    DialogueChosen {
        actions: Vec<QuestAction>,
        updates: Vec<UpdateResult>,
        advanced_to: Option<String>,
    },

    #[serde(rename = "progress")]
    Progress { progress: QuestProgressData },

    #[serde(rename = "questStatus")]
    QuestStatus { quest_id: String, status: QuestStatus },

    #[serde(rename = "notification")]
    Notification { notification: QuestNotification },

    #[serde(rename = "error")]
    Error { message: String },
}

impl From<QuestError> for HostReply {
    fn from(e: QuestError) -> Self {
        HostReply::Error { message: e.to_string() }
    }
}

/// Run one host command against the engine
pub async fn dispatch(engine: &QuestEngine, command: HostCommand) -> HostReply {
    match execute(engine, command).await {
        Ok(reply) => reply,
        Err(e) => e.into(),
    }
}

async fn execute(engine: &QuestEngine, command: HostCommand) -> Result<HostReply, QuestError> {
    let reply = match command {
        HostCommand::StartQuest { player, quest_id, force, starting_step } => {
            let state = engine
                .start_quest(&player, &quest_id, StartOptions { force, starting_step })
                .await?;
            HostReply::QuestStarted {
                quest_id: state.quest_id,
                step_id: state.current_step_id,
            }
        }
        HostCommand::CanStartQuest { player, quest_id } => {
            let verdict = engine.can_start_quest(&player, &quest_id).await?;
            HostReply::Eligibility {
                eligible: verdict.eligible,
                reason: verdict.reason,
            }
        }
        HostCommand::AbandonQuest { username, quest_id } => HostReply::Ack {
            changed: engine.abandon_quest(&username, &quest_id).await?,
        },
        HostCommand::CompleteQuest { username, quest_id } => {
            match engine.complete_quest(&username, &quest_id).await? {
                Some(done) => HostReply::QuestCompleted {
                    quest_id: done.quest_id,
                    completion_count: done.completion_count,
                    rewards: done.rewards,
                },
                None => HostReply::Ack { changed: false },
            }
        }
        HostCommand::FailQuest { username, quest_id, reason } => HostReply::Ack {
            changed: engine.fail_quest(&username, &quest_id, reason.as_deref()).await?,
        },
        HostCommand::Event { username, event, payload } => HostReply::Updates {
            results: engine.update_objective(&username, &event, &payload).await?,
        },
        HostCommand::Poll { player } => HostReply::Updates {
            results: engine.poll_objectives(&player).await?,
        },
        HostCommand::AvailableQuests { player } => {
            let quests = engine
                .get_available_quests(&player)
                .await?
                .iter()
                .map(|q| QuestSummary {
                    id: q.id.clone(),
                    name: q.name.clone(),
                    description: q.description.clone(),
                    category: q.category,
                })
                .collect();
            HostReply::AvailableQuests { quests }
        }
        HostCommand::Dialogues { player, npc_template_id } => {
            let dialogues = engine
                .available_dialogues(&player, &npc_template_id)
                .await?
                .into_iter()
                .map(|d| DialogueView {
                    quest_id: d.quest_id,
                    step_id: d.step_id,
                    dialogue: d.dialogue,
                })
                .collect();
            HostReply::Dialogues { dialogues }
        }
        HostCommand::ChooseOption { player, npc_template_id, quest_id, option_id } => {
            match engine
                .choose_option(&player, &npc_template_id, &quest_id, &option_id)
                .await?
            {
                Some(choice) => HostReply::DialogueChosen {
                    actions: choice.actions,
                    updates: choice.updates,
                    advanced_to: choice.advanced_to,
                },
                None => HostReply::Error {
                    message: "Dialogue option not available.".to_string(),
                },
            }
        }
        HostCommand::AdvanceToStep { username, quest_id, step_id } => {
            engine.advance_to_step(&username, &quest_id, &step_id).await?;
            HostReply::Ack { changed: true }
        }
        HostCommand::SetVariable { username, quest_id, key, value } => {
            engine.set_quest_variable(&username, &quest_id, &key, value).await?;
            HostReply::Ack { changed: true }
        }
        HostCommand::Progress { username } => HostReply::Progress {
            progress: engine.get_progress(&username).await?,
        },
        HostCommand::QuestStatus { username, quest_id } => HostReply::QuestStatus {
            status: engine.quest_status(&username, &quest_id).await?,
            quest_id,
        },
        HostCommand::Logout { username } => HostReply::Ack {
            changed: engine.evict(&username).await?,
        },
    };
    Ok(reply)
}
