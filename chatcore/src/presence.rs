//! Typing indicators and user presence projected for the views.

use crate::format::last_seen_label;
use crate::types::{Counterpart, GroupId, Presence, PresenceUpdate, ReceiverKind, TypingIndicator, UserId};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt::Display;

/// Conversation the indicator should be shown in: the group for group
/// chats, the sender for direct chats.
pub fn typing_key(indicator: &TypingIndicator) -> Counterpart {
    match indicator.receiver.kind {
        ReceiverKind::Group => Counterpart::Group(GroupId::new(indicator.receiver.id.clone())),
        ReceiverKind::User => Counterpart::User(indicator.sender.clone()),
    }
}

fn typing_label(indicator: &TypingIndicator) -> String {
    match indicator.receiver.kind {
        ReceiverKind::Group => {
            let first = indicator
                .sender_name
                .split_whitespace()
                .next()
                .unwrap_or(indicator.sender.as_str());
            format!("{first} is typing...")
        }
        ReceiverKind::User => "Typing...".to_string(),
    }
}

/// Active typing labels per conversation. Entries live until a stop arrives.
#[derive(Debug, Clone, Default)]
pub struct TypingBoard {
    labels: HashMap<Counterpart, String>,
}

impl TypingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the conversation whose label changed, if any.
    pub fn start(&mut self, indicator: &TypingIndicator) -> Option<Counterpart> {
        let key = typing_key(indicator);
        let label = typing_label(indicator);
        if self.labels.get(&key) == Some(&label) {
            return None;
        }
        self.labels.insert(key.clone(), label);
        Some(key)
    }

    pub fn stop(&mut self, indicator: &TypingIndicator) -> Option<Counterpart> {
        let key = typing_key(indicator);
        self.labels.remove(&key).map(|_| key)
    }

    pub fn label(&self, conversation: &Counterpart) -> Option<&str> {
        self.labels.get(conversation).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPresence {
    pub presence: Presence,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl UserPresence {
    pub fn is_online(&self) -> bool {
        self.presence == Presence::Online
    }
}

/// Last known presence per user, last write wins.
#[derive(Debug, Clone, Default)]
pub struct PresenceBoard {
    users: HashMap<UserId, UserPresence>,
}

impl PresenceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the stored presence changed.
    pub fn apply(&mut self, update: &PresenceUpdate) -> bool {
        let previous = self.users.get(&update.user).copied();
        let next = UserPresence {
            presence: update.presence,
            last_active_at: update
                .last_active_at
                .or(previous.and_then(|p| p.last_active_at)),
        };
        if previous == Some(next) {
            return false;
        }
        self.users.insert(update.user.clone(), next);
        true
    }

    pub fn get(&self, user: &UserId) -> Option<UserPresence> {
        self.users.get(user).copied()
    }

    pub fn label<Tz>(&self, user: &UserId, now: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        match self.get(user) {
            Some(p) => last_seen_label(p.is_online(), p.last_active_at, now),
            None => last_seen_label(false, None, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Receiver;

    fn indicator(sender: &str, name: &str, receiver: Receiver) -> TypingIndicator {
        TypingIndicator {
            sender: UserId::new(sender),
            sender_name: name.to_string(),
            receiver,
        }
    }

    #[test]
    fn test_group_typing_uses_first_name_keyed_by_group() {
        let mut board = TypingBoard::new();
        let ind = indicator("u1", "Ada Lovelace", Receiver::group("g1"));

        assert_eq!(board.start(&ind), Some(Counterpart::group("g1")));
        assert_eq!(board.label(&Counterpart::group("g1")), Some("Ada is typing..."));
        assert_eq!(board.label(&Counterpart::user("u1")), None);
    }

    #[test]
    fn test_direct_typing_keyed_by_sender() {
        let mut board = TypingBoard::new();
        let ind = indicator("u1", "Ada", Receiver::user("me"));

        board.start(&ind);
        assert_eq!(board.label(&Counterpart::user("u1")), Some("Typing..."));
        // Repeated start is not a change.
        assert_eq!(board.start(&ind), None);

        assert_eq!(board.stop(&ind), Some(Counterpart::user("u1")));
        assert!(board.is_empty());
        assert_eq!(board.stop(&ind), None);
    }

    #[test]
    fn test_presence_last_write_wins_and_keeps_last_active() {
        let mut board = PresenceBoard::new();
        let user = UserId::new("u1");
        let seen = Utc::now();

        assert!(board.apply(&PresenceUpdate {
            user: user.clone(),
            presence: Presence::Offline,
            last_active_at: Some(seen),
        }));
        assert!(board.apply(&PresenceUpdate {
            user: user.clone(),
            presence: Presence::Online,
            last_active_at: None,
        }));

        let p = board.get(&user).unwrap();
        assert!(p.is_online());
        assert_eq!(p.last_active_at, Some(seen));
        assert_eq!(board.label(&user, &Utc::now()), "Online");
        assert_eq!(board.label(&UserId::new("nobody"), &Utc::now()), "Offline");
    }
}
