//! Conversation list ordered by last activity.

use crate::format::conversation_time_label;
use crate::presence::TypingBoard;
use crate::types::{Counterpart, Message, MessageId, UserId};
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;

/// A chat/conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub counterpart: Counterpart,
    /// Display name
    pub name: String,
    pub last_message: Option<Message>,
    pub last_activity: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl Conversation {
    pub fn new(id: impl Into<String>, counterpart: Counterpart, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            counterpart,
            name: name.into(),
            last_message: None,
            last_activity: None,
            unread_count: 0,
        }
    }

    pub fn with_last_message(mut self, message: Message) -> Self {
        self.last_activity = Some(message.sent_at);
        self.last_message = Some(message);
        self
    }

    pub fn with_unread(mut self, unread_count: u32) -> Self {
        self.unread_count = unread_count;
        self
    }

    pub fn preview(&self) -> String {
        self.last_message
            .as_ref()
            .map(Message::preview_text)
            .unwrap_or_default()
    }

    /// Initial letter for avatar display
    pub fn initial(&self) -> char {
        self.name.chars().next().unwrap_or('?')
    }
}

/// Render-ready conversation list entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRow {
    pub counterpart: Counterpart,
    pub name: String,
    pub preview: String,
    pub typing: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

impl ConversationRow {
    pub fn time_label<Tz>(&self, now: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.last_activity
            .map(|at| conversation_time_label(at, now))
    }
}

/// Conversations, most recent activity first, one per counterpart.
#[derive(Debug, Clone, Default)]
pub struct ConversationIndex {
    conversations: Vec<Conversation>,
    /// Messages already folded into a row; redeliveries are ignored.
    counted: HashSet<MessageId>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(conversations: Vec<Conversation>) -> Self {
        let mut index = Self::new();
        index.extend_page(conversations);
        index
    }

    /// Merge a further page of conversations; known counterparts are kept as is.
    pub fn extend_page(&mut self, page: Vec<Conversation>) {
        let mut seen: HashSet<Counterpart> = self
            .conversations
            .iter()
            .map(|c| c.counterpart.clone())
            .collect();
        for conversation in page {
            if seen.insert(conversation.counterpart.clone()) {
                self.conversations.push(conversation);
            }
        }
        // Stable: ties keep service order.
        self.conversations
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, counterpart: &Counterpart) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|c| &c.counterpart == counterpart)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn position(&self, counterpart: &Counterpart) -> Option<usize> {
        self.conversations
            .iter()
            .position(|c| &c.counterpart == counterpart)
    }

    /// Move the message's conversation to the front. Unknown counterparts are
    /// never synthesized, and a message already counted changes nothing.
    pub fn on_message(&mut self, message: &Message, local_user: &UserId) -> bool {
        let counterpart = message.counterpart(local_user);
        let Some(pos) = self.position(&counterpart) else {
            debug!("No conversation for {counterpart}, ignoring message {}", message.id);
            return false;
        };
        let is_last = self.conversations[pos]
            .last_message
            .as_ref()
            .is_some_and(|last| last.id == message.id);
        if !self.counted.insert(message.id.clone()) || is_last {
            debug!("Message {} already counted for {counterpart}", message.id);
            return false;
        }

        let mut conversation = self.conversations.remove(pos);
        conversation.last_activity = Some(
            conversation
                .last_activity
                .map_or(message.sent_at, |t| t.max(message.sent_at)),
        );
        if !message.is_thread_reply() {
            conversation.last_message = Some(message.clone());
        }
        if !message.is_from(local_user) && !message.is_tombstone() {
            conversation.unread_count += 1;
        }
        self.conversations.insert(0, conversation);
        true
    }

    /// Refresh the preview when the current last message (known as
    /// `previous_id`) was edited, deleted or confirmed under a new id. A
    /// deleted preview is never replaced by a live record.
    pub fn on_message_updated(
        &mut self,
        previous_id: &MessageId,
        message: &Message,
        local_user: &UserId,
    ) -> bool {
        if previous_id != &message.id && self.counted.contains(previous_id) {
            self.counted.insert(message.id.clone());
        }
        let counterpart = message.counterpart(local_user);
        let Some(pos) = self.position(&counterpart) else {
            return false;
        };
        let conversation = &mut self.conversations[pos];
        match &conversation.last_message {
            Some(last) if last.is_tombstone() && !message.is_tombstone() => {
                debug!("Keeping deleted preview of {} over a late update", last.id);
                false
            }
            Some(last) if &last.id == previous_id => {
                conversation.last_message = Some(message.clone());
                true
            }
            _ => false,
        }
    }

    /// Drop a conversation, e.g. after leaving its group.
    pub fn remove(&mut self, counterpart: &Counterpart) -> Option<Conversation> {
        self.position(counterpart)
            .map(|pos| self.conversations.remove(pos))
    }

    pub fn mark_read(&mut self, counterpart: &Counterpart) -> bool {
        match self.position(counterpart) {
            Some(pos) if self.conversations[pos].unread_count > 0 => {
                self.conversations[pos].unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn rows(&self, typing: &TypingBoard) -> Vec<ConversationRow> {
        self.conversations
            .iter()
            .map(|c| {
                let label = typing.label(&c.counterpart);
                ConversationRow {
                    counterpart: c.counterpart.clone(),
                    name: c.name.clone(),
                    preview: label.map_or_else(|| c.preview(), str::to_string),
                    typing: label.is_some(),
                    last_activity: c.last_activity,
                    unread_count: c.unread_count,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Receiver, TypingIndicator};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn me() -> UserId {
        UserId::new("me")
    }

    fn direct(peer: &str, secs: i64) -> Conversation {
        let last = Message::text(format!("m-{peer}"), peer, Receiver::user("me"), "hello", at(secs));
        Conversation::new(format!("me_{peer}"), Counterpart::user(peer), peer.to_uppercase())
            .with_last_message(last)
    }

    fn order(index: &ConversationIndex) -> Vec<&str> {
        index
            .conversations()
            .iter()
            .map(|c| c.counterpart.id())
            .collect()
    }

    #[test]
    fn test_load_sorts_and_dedupes() {
        let index = ConversationIndex::load(vec![
            direct("a", 10),
            direct("b", 30),
            direct("c", 20),
            direct("b", 5),
        ]);
        assert_eq!(order(&index), vec!["b", "c", "a"]);
    }

    /// Conversations [A, B, C] by recency; a message in C moves it to the front.
    #[test]
    fn test_message_moves_conversation_to_front() {
        let mut index = ConversationIndex::load(vec![direct("a", 30), direct("b", 20), direct("c", 10)]);
        let msg = Message::text("99", "c", Receiver::user("me"), "new!", at(40));

        assert!(index.on_message(&msg, &me()));
        assert_eq!(order(&index), vec!["c", "a", "b"]);

        let c = index.get(&Counterpart::user("c")).unwrap();
        assert_eq!(c.preview(), "new!");
        assert_eq!(c.unread_count, 1);
        assert_eq!(c.last_activity, Some(at(40)));
    }

    #[test]
    fn test_unknown_counterpart_not_synthesized() {
        let mut index = ConversationIndex::load(vec![direct("a", 30)]);
        let msg = Message::text("1", "stranger", Receiver::user("me"), "hi", at(50));
        assert!(!index.on_message(&msg, &me()));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_thread_reply_bumps_but_keeps_preview() {
        let mut index = ConversationIndex::load(vec![direct("a", 30), direct("b", 20)]);
        let reply = Message::text("5", "me", Receiver::user("b"), "in thread", at(60)).with_parent("m-b");

        assert!(index.on_message(&reply, &me()));
        assert_eq!(order(&index), vec!["b", "a"]);
        let b = index.get(&Counterpart::user("b")).unwrap();
        assert_eq!(b.preview(), "hello");
        assert_eq!(b.unread_count, 0);
    }

    #[test]
    fn test_mark_read_and_deleted_preview() {
        let mut index = ConversationIndex::load(vec![direct("a", 30).with_unread(3)]);
        assert!(index.mark_read(&Counterpart::user("a")));
        assert!(!index.mark_read(&Counterpart::user("a")));

        let last = index.conversations()[0].last_message.clone().unwrap();
        assert!(index.on_message_updated(&last.id, &last.tombstoned(at(31)), &me()));
        assert_eq!(index.conversations()[0].preview(), "This message has been deleted");
    }

    #[test]
    fn test_redelivered_message_is_counted_once() {
        let mut index = ConversationIndex::load(vec![direct("a", 30), direct("b", 20)]);
        let msg = Message::text("7", "b", Receiver::user("me"), "again?", at(40));

        let later = Message::text("8", "a", Receiver::user("me"), "later", at(50));

        assert!(index.on_message(&msg, &me()));
        assert!(index.on_message(&later, &me()));
        assert!(!index.on_message(&msg, &me()));

        assert_eq!(order(&index), vec!["a", "b"]);
        assert_eq!(index.get(&Counterpart::user("b")).unwrap().unread_count, 1);
    }

    #[test]
    fn test_seeded_last_message_is_not_recounted() {
        let mut index = ConversationIndex::load(vec![direct("a", 30).with_unread(2)]);
        let last = index.conversations()[0].last_message.clone().unwrap();
        assert!(!index.on_message(&last, &me()));
        assert_eq!(index.conversations()[0].unread_count, 2);
    }

    #[test]
    fn test_late_edit_keeps_deleted_preview() {
        let mut index = ConversationIndex::load(vec![direct("a", 30)]);
        let last = index.conversations()[0].last_message.clone().unwrap();
        assert!(index.on_message_updated(&last.id, &last.tombstoned(at(31)), &me()));

        let late = Message::text("m-a", "a", Receiver::user("me"), "edited late", at(30));
        assert!(!index.on_message_updated(&last.id, &late, &me()));
        assert_eq!(index.conversations()[0].preview(), "This message has been deleted");
    }

    #[test]
    fn test_confirmed_echo_is_not_recounted() {
        let mut index = ConversationIndex::load(vec![direct("a", 30)]);
        let echo = Message::text("local-1", "me", Receiver::user("a"), "yo", at(40));
        let other = Message::text("8", "a", Receiver::user("me"), "hey", at(41));
        let confirmed = Message::text("9", "me", Receiver::user("a"), "yo", at(40));

        assert!(index.on_message(&echo, &me()));
        assert!(index.on_message(&other, &me()));
        // Echo is no longer the last message; the confirmed id is still known.
        assert!(!index.on_message_updated(&echo.id, &confirmed, &me()));
        assert!(!index.on_message(&confirmed, &me()));
        assert_eq!(index.conversations()[0].preview(), "hey");
    }

    #[test]
    fn test_remove_drops_row() {
        let mut index = ConversationIndex::load(vec![direct("a", 30), direct("b", 20)]);
        assert!(index.remove(&Counterpart::user("a")).is_some());
        assert!(index.remove(&Counterpart::user("a")).is_none());
        assert_eq!(order(&index), vec!["b"]);
    }

    #[test]
    fn test_rows_show_typing_label() {
        let index = ConversationIndex::load(vec![direct("a", 30), direct("b", 20)]);
        let mut typing = TypingBoard::new();
        typing.start(&TypingIndicator {
            sender: UserId::new("b"),
            sender_name: "Bob".into(),
            receiver: Receiver::user("me"),
        });

        let rows = index.rows(&typing);
        assert_eq!(rows[0].preview, "hello");
        assert!(!rows[0].typing);
        assert_eq!(rows[1].preview, "Typing...");
        assert!(rows[1].typing);
        assert_eq!(rows[1].time_label(&at(86_400)), Some("Yesterday".to_string()));
    }
}
