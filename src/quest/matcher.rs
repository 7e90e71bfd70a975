//! Objective Matcher
//!
//! Maps each objective kind to the single event name that can advance it
//! plus a payload check.

use super::definition::{ObjectiveKind, QuestObjective};
use super::events::{self, EventPayload};

/// The event name an objective listens for, `None` for polled kinds
pub fn event_for(kind: &ObjectiveKind) -> Option<&'static str> {
    match kind {
        ObjectiveKind::UseItem { .. } => Some(events::ITEM_USED),
        ObjectiveKind::PickupItem { .. } => Some(events::ITEM_PICKUP),
        ObjectiveKind::TalkToNpc { .. } => Some(events::NPC_TALKED),
        ObjectiveKind::KillMob { .. } => Some(events::NPC_DEATH),
        ObjectiveKind::EnterRoom { .. } => Some(events::ROOM_ENTER),
        ObjectiveKind::DeliverItem { .. } => Some(events::ITEM_DELIVERED),
        ObjectiveKind::ReachLevel { .. } => Some(events::PLAYER_LEVELUP),
        ObjectiveKind::EquipItem { .. } => Some(events::ITEM_EQUIPPED),
        ObjectiveKind::HaveItem { .. } | ObjectiveKind::HaveFlag { .. } => None,
    }
}

/// Whether `event_name` with `payload` advances `objective`
pub fn matches(objective: &QuestObjective, event_name: &str, payload: &EventPayload) -> bool {
    if event_for(&objective.kind) != Some(event_name) {
        return false;
    }

    match &objective.kind {
        ObjectiveKind::UseItem { item_id } | ObjectiveKind::PickupItem { item_id } => {
            payload.field_equals("itemId", item_id)
        }
        ObjectiveKind::TalkToNpc { npc_template_id, dialogue_option } => {
            payload.field_equals("npcTemplateId", npc_template_id)
                && dialogue_option
                    .as_deref()
                    .is_none_or(|option| payload.field_equals("dialogueOption", option))
        }
        ObjectiveKind::KillMob { npc_template_id } => {
            payload.field_equals("npcTemplateId", npc_template_id)
        }
        ObjectiveKind::EnterRoom { room_id } => payload.field_equals("roomId", room_id),
        ObjectiveKind::DeliverItem { item_id, npc_template_id } => {
            payload.field_equals("itemId", item_id)
                && payload.field_equals("npcTemplateId", npc_template_id)
        }
        // Multi-level gains can skip the exact target level
        ObjectiveKind::ReachLevel { level } => payload
            .get_u64("level")
            .is_some_and(|reached| reached >= u64::from(*level)),
        ObjectiveKind::EquipItem { item_id, slot } => {
            payload.field_equals("itemId", item_id)
                && slot
                    .as_deref()
                    .is_none_or(|slot| payload.field_equals("slot", slot))
        }
        ObjectiveKind::HaveItem { .. } | ObjectiveKind::HaveFlag { .. } => false,
    }
}

/// How far a matching event moves the objective's `current` count.
///
/// Level objectives jump straight to the reached level; everything else
/// counts one per event.
pub(crate) fn progress_amount(
    objective: &QuestObjective,
    payload: &EventPayload,
) -> ProgressAmount {
    match &objective.kind {
        ObjectiveKind::ReachLevel { .. } => {
            let reached = payload.get_u64("level").unwrap_or(0);
            ProgressAmount::Observed(u32::try_from(reached).unwrap_or(u32::MAX))
        }
        _ => ProgressAmount::Increment(1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressAmount {
    Increment(u32),
    Observed(u32),
}
