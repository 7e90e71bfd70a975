//! Dialogue Gate
//!
//! Option requirements for NPC conversations offered by active quest
//! steps. `QuestEngine::available_dialogues` and
//! `QuestEngine::choose_option` apply them under the player's lock.

use super::definition::{DialogueOption, DialogueRequirements, QuestAction};
use super::events::UpdateResult;
use super::prerequisites::{PlayerRequirements, PlayerSnapshot, PrerequisiteFailure};
use super::state::QuestProgressData;

/// Check one option's requirements against a player
pub fn check_option(
    player: &PlayerSnapshot,
    progress: &QuestProgressData,
    requirements: &DialogueRequirements,
) -> Result<(), PrerequisiteFailure> {
    PlayerRequirements {
        min_level: requirements.min_level,
        max_level: requirements.max_level,
        class: requirements.class.as_deref(),
        race: requirements.race.as_deref(),
        quest_flags: &requirements.quest_flags,
        flags: &requirements.flags,
    }
    .check(player)?;

    if let Some(flag) = requirements.not_flags.iter().find(|f| player.has_any_flag(f)) {
        return Err(PrerequisiteFailure::ForbiddenFlag(flag.clone()));
    }

    if let Some(required) = &requirements.active_step {
        let on_step = progress
            .active(&required.quest_id)
            .is_some_and(|q| q.current_step_id == required.step_id);
        if !on_step {
            return Err(PrerequisiteFailure::NotOnStep {
                quest_id: required.quest_id.clone(),
                step_id: required.step_id.clone(),
            });
        }
    }

    Ok(())
}

pub fn is_option_available(
    player: &PlayerSnapshot,
    progress: &QuestProgressData,
    option: &DialogueOption,
) -> bool {
    check_option(player, progress, &option.requirements).is_ok()
}

/// Outcome of picking a dialogue option
#[derive(Debug, Clone)]
pub struct DialogueChoice {
    /// Actions attached to the option, for the host to apply
    pub actions: Vec<QuestAction>,
    /// Objective progress from the `npc:talked` event
    pub updates: Vec<UpdateResult>,
    /// Step the quest branched to, if the option moved it
    pub advanced_to: Option<String>,
}
