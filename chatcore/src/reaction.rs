//! Emoji reaction aggregation, one reaction per actor per message.

use crate::types::{MessageId, ReactionAggregate, UserId};
use serde::{Deserialize, Serialize};

/// Upper bound on distinct emoji aggregates kept for a single message.
pub const MAX_REACTIONS_PER_MESSAGE: usize = 50;

/// Quick-pick palette offered next to a message.
pub const QUICK_REACTIONS: [&str; 10] = [
    "😊", "😂", "👍", "❤️", "🔥", "👏", "😘", "😳", "👀", "😜",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Outbound call the client owes the service after a local reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCommand {
    pub action: ReactionAction,
    pub emoji: String,
}

impl ReactionCommand {
    fn add(emoji: &str) -> Self {
        Self {
            action: ReactionAction::Add,
            emoji: emoji.to_string(),
        }
    }

    fn remove(emoji: &str) -> Self {
        Self {
            action: ReactionAction::Remove,
            emoji: emoji.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionChange {
    pub reactions: Vec<ReactionAggregate>,
    pub commands: Vec<ReactionCommand>,
}

impl ReactionChange {
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Reaction added or removed by some actor, as delivered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub message_id: MessageId,
    pub emoji: String,
    pub actor: UserId,
    pub action: ReactionAction,
    /// Full aggregate list after the change, when the service sends one.
    pub snapshot: Option<Vec<ReactionAggregate>>,
}

fn increment(reactions: &mut Vec<ReactionAggregate>, emoji: &str, by_me: bool) -> bool {
    if let Some(existing) = reactions.iter_mut().find(|r| r.emoji == emoji) {
        existing.count += 1;
        existing.reacted_by_me |= by_me;
        return true;
    }
    if reactions.len() >= MAX_REACTIONS_PER_MESSAGE {
        return false;
    }
    reactions.push(ReactionAggregate::new(emoji, 1, by_me));
    true
}

fn decrement(reactions: &mut Vec<ReactionAggregate>, emoji: &str, by_me: bool) -> bool {
    let Some(pos) = reactions.iter().position(|r| r.emoji == emoji) else {
        return false;
    };
    let entry = &mut reactions[pos];
    entry.count = entry.count.saturating_sub(1);
    if by_me {
        entry.reacted_by_me = false;
    }
    if entry.count == 0 {
        reactions.remove(pos);
    }
    true
}

/// Apply a local reaction click to `current`.
pub fn apply_reaction(
    current: &[ReactionAggregate],
    emoji: &str,
    action: ReactionAction,
) -> ReactionChange {
    let mut reactions = current.to_vec();
    let mut commands = Vec::new();
    let held = current
        .iter()
        .find(|r| r.reacted_by_me)
        .map(|r| r.emoji.clone());

    match (action, held.as_deref()) {
        (_, Some(mine)) if mine == emoji => {
            decrement(&mut reactions, emoji, true);
            commands.push(ReactionCommand::remove(emoji));
        }
        (ReactionAction::Remove, _) => {}
        (ReactionAction::Add, Some(other)) => {
            decrement(&mut reactions, other, true);
            commands.push(ReactionCommand::remove(other));
            increment(&mut reactions, emoji, true);
            commands.push(ReactionCommand::add(emoji));
        }
        (ReactionAction::Add, None) => {
            increment(&mut reactions, emoji, true);
            commands.push(ReactionCommand::add(emoji));
        }
    }

    ReactionChange {
        reactions,
        commands,
    }
}

/// Fold a service reaction event into `current`. Returns `None` when nothing changes.
///
/// Events authored by `local_user` are checked against the optimistic state
/// so a confirmation of a click already applied isn't counted twice.
pub fn reconcile_event(
    current: &[ReactionAggregate],
    event: &ReactionEvent,
    local_user: &UserId,
) -> Option<Vec<ReactionAggregate>> {
    let by_me = &event.actor == local_user;

    if let Some(snapshot) = &event.snapshot {
        let mut next: Vec<ReactionAggregate> = snapshot
            .iter()
            .filter(|r| r.count > 0)
            .take(MAX_REACTIONS_PER_MESSAGE)
            .cloned()
            .collect();
        if by_me {
            for r in next.iter_mut().filter(|r| r.emoji == event.emoji) {
                r.reacted_by_me = event.action == ReactionAction::Add;
            }
        }
        return (next != current).then_some(next);
    }

    let mut next = current.to_vec();
    let holds = current
        .iter()
        .any(|r| r.emoji == event.emoji && r.reacted_by_me);

    let changed = match (event.action, by_me) {
        (ReactionAction::Add, true) if holds => false,
        (ReactionAction::Remove, true) if !holds => false,
        (ReactionAction::Add, _) => increment(&mut next, &event.emoji, by_me),
        (ReactionAction::Remove, _) => decrement(&mut next, &event.emoji, by_me),
    };
    changed.then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(emoji: &str, count: u32, mine: bool) -> ReactionAggregate {
        ReactionAggregate::new(emoji, count, mine)
    }

    fn event(emoji: &str, actor: &str, action: ReactionAction) -> ReactionEvent {
        ReactionEvent {
            message_id: MessageId::new("1"),
            emoji: emoji.to_string(),
            actor: UserId::new(actor),
            action,
            snapshot: None,
        }
    }

    fn me() -> UserId {
        UserId::new("me")
    }

    #[test]
    fn test_toggle_law_restores_original() {
        let start = vec![agg("👍", 2, false)];
        let on = apply_reaction(&start, "👍", ReactionAction::Add);
        assert_eq!(on.reactions, vec![agg("👍", 3, true)]);

        let off = apply_reaction(&on.reactions, "👍", ReactionAction::Add);
        assert_eq!(off.reactions, start);
        assert_eq!(off.commands, vec![ReactionCommand::remove("👍")]);
    }

    #[test]
    fn test_fresh_add_then_toggle_off_drops_aggregate() {
        let on = apply_reaction(&[], "🔥", ReactionAction::Add);
        assert_eq!(on.reactions, vec![agg("🔥", 1, true)]);
        let off = apply_reaction(&on.reactions, "🔥", ReactionAction::Remove);
        assert!(off.reactions.is_empty());
    }

    #[test]
    fn test_switch_moves_single_reaction() {
        let start = vec![agg("👍", 2, true), agg("😂", 1, false)];
        let change = apply_reaction(&start, "😂", ReactionAction::Add);

        assert_eq!(change.reactions, vec![agg("👍", 1, false), agg("😂", 2, true)]);
        assert_eq!(
            change.commands,
            vec![ReactionCommand::remove("👍"), ReactionCommand::add("😂")]
        );
    }

    #[test]
    fn test_remove_of_unheld_emoji_is_noop() {
        let start = vec![agg("👍", 2, false)];
        let change = apply_reaction(&start, "👍", ReactionAction::Remove);
        assert!(change.is_noop());
        assert_eq!(change.reactions, start);
    }

    #[test]
    fn test_own_confirmation_is_not_double_counted() {
        let optimistic = apply_reaction(&[], "❤️", ReactionAction::Add).reactions;
        let confirmed = reconcile_event(&optimistic, &event("❤️", "me", ReactionAction::Add), &me());
        assert_eq!(confirmed, None);
    }

    #[test]
    fn test_remote_events_adjust_counts() {
        let start = vec![agg("👍", 1, true)];
        let added = reconcile_event(&start, &event("👍", "u1", ReactionAction::Add), &me()).unwrap();
        assert_eq!(added, vec![agg("👍", 2, true)]);

        let removed =
            reconcile_event(&added, &event("👍", "u1", ReactionAction::Remove), &me()).unwrap();
        assert_eq!(removed, start);

        assert_eq!(
            reconcile_event(&[], &event("👀", "u1", ReactionAction::Remove), &me()),
            None
        );
    }

    #[test]
    fn test_snapshot_replaces_list() {
        let start = vec![agg("👍", 5, false)];
        let mut ev = event("😳", "u2", ReactionAction::Add);
        ev.snapshot = Some(vec![agg("👍", 1, false), agg("😳", 1, false)]);

        let next = reconcile_event(&start, &ev, &me()).unwrap();
        assert_eq!(next, vec![agg("👍", 1, false), agg("😳", 1, false)]);
    }

    #[test]
    fn test_rapid_toggles_converge_after_confirmations() {
        // Click, click again, then both confirmations arrive.
        let on = apply_reaction(&[], "👍", ReactionAction::Add).reactions;
        let off = apply_reaction(&on, "👍", ReactionAction::Add).reactions;
        assert!(off.is_empty());

        let after_add = reconcile_event(&off, &event("👍", "me", ReactionAction::Add), &me())
            .unwrap_or(off.clone());
        let settled = reconcile_event(
            &after_add,
            &event("👍", "me", ReactionAction::Remove),
            &me(),
        )
        .unwrap_or(after_add.clone());

        assert!(settled.is_empty());
    }

    #[test]
    fn test_remote_new_emoji_capped() {
        let full: Vec<ReactionAggregate> = (0..MAX_REACTIONS_PER_MESSAGE)
            .map(|i| agg(&format!("e{i}"), 1, false))
            .collect();
        assert_eq!(
            reconcile_event(&full, &event("🆕", "u1", ReactionAction::Add), &me()),
            None
        );
        // Existing emoji still count.
        assert!(reconcile_event(&full, &event("e3", "u1", ReactionAction::Add), &me()).is_some());
    }
}
