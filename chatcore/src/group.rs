//! Group member rosters, kept current from membership action messages.

use crate::types::{GroupAction, GroupId, Message, MessageBody, ReceiverKind, UserId};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Member scope (admin level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberScope {
    #[default]
    Participant,
    Moderator,
    Admin,
}

impl MemberScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberScope::Participant => "participant",
            MemberScope::Moderator => "moderator",
            MemberScope::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, MemberScope::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user: UserId,
    pub name: String,
    pub scope: MemberScope,
}

impl GroupMember {
    pub fn new(user: impl Into<UserId>, name: impl Into<String>, scope: MemberScope) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
            scope,
        }
    }

    pub fn participant(user: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self::new(user, name, MemberScope::Participant)
    }

    pub fn is_admin(&self) -> bool {
        self.scope.is_admin()
    }
}

/// Roster effect of one membership action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined { user: UserId, name: Option<String> },
    Left { user: UserId },
}

impl MembershipChange {
    pub fn user(&self) -> &UserId {
        match self {
            MembershipChange::Joined { user, .. } | MembershipChange::Left { user } => user,
        }
    }
}

/// Read a group action message as a roster change.
///
/// Unbanning does not make someone a member again; they still have to join.
pub fn membership_change(message: &Message) -> Option<(GroupId, MembershipChange)> {
    if message.receiver.kind != ReceiverKind::Group {
        return None;
    }
    let MessageBody::Action {
        action,
        actor,
        target,
    } = &message.body
    else {
        return None;
    };
    let actor_name = || (&message.sender == actor).then(|| message.sender_name.clone()).flatten();
    let change = match action {
        GroupAction::Joined => MembershipChange::Joined {
            user: actor.clone(),
            name: actor_name(),
        },
        GroupAction::Added => MembershipChange::Joined {
            user: target.clone()?,
            name: None,
        },
        GroupAction::Left => MembershipChange::Left {
            user: actor.clone(),
        },
        GroupAction::Kicked | GroupAction::Banned | GroupAction::Removed => {
            MembershipChange::Left {
                user: target.clone()?,
            }
        }
        GroupAction::Unbanned => return None,
    };
    Some((GroupId::new(message.receiver.id.clone()), change))
}

/// Members of one group.
///
/// Changes carry the time they happened; one that is not newer than the last
/// change seen for that user is ignored, so redelivered or reordered events
/// settle on the latest state.
#[derive(Debug, Clone, Default)]
pub struct GroupRoster {
    members: Vec<GroupMember>,
    changed_at: HashMap<UserId, DateTime<Utc>>,
}

impl GroupRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a fetched member list; duplicates keep the first entry.
    pub fn load(members: Vec<GroupMember>) -> Self {
        let mut roster = Self::new();
        for member in members {
            roster.add(member);
        }
        roster
    }

    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    pub fn get(&self, user: &UserId) -> Option<&GroupMember> {
        self.members.iter().find(|m| &m.user == user)
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.get(user).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn add(&mut self, member: GroupMember) -> bool {
        if self.contains(&member.user) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub fn remove(&mut self, user: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| &m.user != user);
        self.members.len() != before
    }

    /// Apply a change that happened at `at`. Returns whether the roster changed.
    pub fn apply(&mut self, change: &MembershipChange, at: DateTime<Utc>) -> bool {
        let user = change.user();
        if self.changed_at.get(user).is_some_and(|last| *last >= at) {
            debug!("Ignoring stale membership change for {user}");
            return false;
        }
        self.changed_at.insert(user.clone(), at);
        match change {
            MembershipChange::Joined { user, name } => self.add(GroupMember::participant(
                user.clone(),
                name.clone().unwrap_or_else(|| user.to_string()),
            )),
            MembershipChange::Left { user } => self.remove(user),
        }
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.get(user).is_some_and(GroupMember::is_admin)
    }

    /// Admins may remove anyone but themselves.
    pub fn can_kick(&self, local_user: &UserId, user: &UserId) -> bool {
        local_user != user && self.is_admin(local_user) && self.contains(user)
    }

    /// Candidates that are not in the group yet, in the given order.
    pub fn non_members<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) -> Vec<&'a UserId> {
        users.into_iter().filter(|u| !self.contains(u)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Receiver;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn action(id: &str, action: GroupAction, actor: &str, target: Option<&str>, secs: i64) -> Message {
        Message::new(
            id,
            actor,
            Receiver::group("g1"),
            MessageBody::Action {
                action,
                actor: UserId::new(actor),
                target: target.map(UserId::new),
            },
            at(secs),
        )
    }

    fn roster() -> GroupRoster {
        GroupRoster::load(vec![
            GroupMember::new("admin", "Ada Admin", MemberScope::Admin),
            GroupMember::participant("u1", "Uno"),
            GroupMember::participant("u1", "Duplicate"),
        ])
    }

    fn users(roster: &GroupRoster) -> Vec<&str> {
        roster.members().iter().map(|m| m.user.as_str()).collect()
    }

    #[test]
    fn test_load_dedupes_members() {
        let roster = roster();
        assert_eq!(users(&roster), vec!["admin", "u1"]);
        assert_eq!(roster.get(&UserId::new("u1")).unwrap().name, "Uno");
        assert!(roster.is_admin(&UserId::new("admin")));
        assert!(!roster.is_admin(&UserId::new("u1")));
    }

    #[test]
    fn test_action_messages_map_to_changes() {
        let joined = action("1", GroupAction::Joined, "u2", None, 1).with_sender_name("Dos Two");
        let (group, change) = membership_change(&joined).unwrap();
        assert_eq!(group, GroupId::new("g1"));
        assert_eq!(
            change,
            MembershipChange::Joined {
                user: UserId::new("u2"),
                name: Some("Dos Two".to_string()),
            }
        );

        let kicked = action("2", GroupAction::Kicked, "admin", Some("u1"), 2);
        assert_eq!(
            membership_change(&kicked).map(|(_, c)| c),
            Some(MembershipChange::Left {
                user: UserId::new("u1")
            })
        );

        let unbanned = action("3", GroupAction::Unbanned, "admin", Some("u3"), 3);
        assert_eq!(membership_change(&unbanned), None);

        let text = Message::text("4", "u1", Receiver::group("g1"), "hi", at(4));
        assert_eq!(membership_change(&text), None);
    }

    #[test]
    fn test_events_update_roster() {
        let mut roster = roster();
        for message in [
            action("1", GroupAction::Added, "admin", Some("u2"), 1),
            action("2", GroupAction::Joined, "u3", None, 2),
            action("3", GroupAction::Banned, "admin", Some("u1"), 3),
            action("4", GroupAction::Left, "u3", None, 4),
        ] {
            let (_, change) = membership_change(&message).unwrap();
            assert!(roster.apply(&change, message.sent_at));
        }
        assert_eq!(users(&roster), vec!["admin", "u2"]);
        assert_eq!(roster.get(&UserId::new("u2")).unwrap().name, "u2");
    }

    #[test]
    fn test_redelivered_and_reordered_changes_settle_on_latest() {
        let mut roster = roster();
        let left = action("5", GroupAction::Left, "u1", None, 20);
        let joined_earlier = action("4", GroupAction::Joined, "u1", None, 10);

        let (_, change) = membership_change(&left).unwrap();
        assert!(roster.apply(&change, left.sent_at));
        assert!(!roster.apply(&change, left.sent_at));

        let (_, change) = membership_change(&joined_earlier).unwrap();
        assert!(!roster.apply(&change, joined_earlier.sent_at));
        assert!(!roster.contains(&UserId::new("u1")));
    }

    #[test]
    fn test_kick_permissions_and_candidates() {
        let roster = roster();
        let admin = UserId::new("admin");
        let u1 = UserId::new("u1");

        assert!(roster.can_kick(&admin, &u1));
        assert!(!roster.can_kick(&admin, &admin));
        assert!(!roster.can_kick(&u1, &admin));
        assert!(!roster.can_kick(&admin, &UserId::new("stranger")));

        let everyone = [admin.clone(), u1.clone(), UserId::new("u7")];
        let candidates: Vec<&str> = roster.non_members(&everyone).iter().map(|u| u.as_str()).collect();
        assert_eq!(candidates, vec!["u7"]);
    }
}
