//! Message reconciliation: de-duplicating merges of history pages and live
//! events into an ordered per-conversation list.

use crate::types::{Counterpart, Message, MessageCategory, MessageId, ReceiverKind, UserId};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

/// Where a merged batch lands relative to the existing list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Older page: the batch is placed before the existing messages.
    History,
    /// Live events: the batch is placed after the existing messages.
    Live,
}

/// Decides whether a message belongs to a given list.
pub trait MessageFilter {
    fn accepts(&self, message: &Message) -> bool;
}

/// Main-view filter for one open conversation.
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    pub local_user: UserId,
    pub counterpart: Counterpart,
}

impl ConversationFilter {
    pub fn new(local_user: UserId, counterpart: Counterpart) -> Self {
        Self {
            local_user,
            counterpart,
        }
    }

    fn pair_matches(&self, message: &Message) -> bool {
        match &self.counterpart {
            Counterpart::Group(group) => {
                message.receiver.kind == ReceiverKind::Group
                    && message.receiver.id == group.as_str()
            }
            Counterpart::User(peer) => {
                message.receiver.kind == ReceiverKind::User
                    && ((message.sender == *peer
                        && message.receiver.id == self.local_user.as_str())
                        || (message.sender == self.local_user
                            && message.receiver.id == peer.as_str()))
            }
        }
    }
}

impl MessageFilter for ConversationFilter {
    fn accepts(&self, message: &Message) -> bool {
        if message.is_thread_reply() {
            return false;
        }
        message.category() == MessageCategory::Action || self.pair_matches(message)
    }
}

/// Filter for the replies of one thread root.
#[derive(Debug, Clone)]
pub struct ThreadFilter {
    pub parent: MessageId,
}

impl ThreadFilter {
    pub fn new(parent: MessageId) -> Self {
        Self { parent }
    }
}

impl MessageFilter for ThreadFilter {
    fn accepts(&self, message: &Message) -> bool {
        message.parent_id.as_ref() == Some(&self.parent)
    }
}

/// Result of merging one page of history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The service returned an empty page; there is nothing older.
    Exhausted,
    /// The page was merged; `accepted` messages passed the filter.
    Merged { accepted: usize },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Existing,
    Incoming,
}

fn should_replace(current: (&Message, Origin), candidate: (&Message, Origin)) -> bool {
    // A tombstone is never resurrected by a stale, live copy.
    if current.0.is_tombstone() && !candidate.0.is_tombstone() {
        return false;
    }
    !(current.1 == Origin::Incoming && candidate.1 == Origin::Existing)
}

/// Merge `incoming` into `existing`, keyed by message id.
///
/// The concatenation order depends on `mode`; each id keeps the position of
/// its earliest occurrence, and the incoming record wins over the existing
/// one unless that would replace a tombstone with a live copy.
pub fn merge(existing: &[Message], incoming: &[Message], mode: MergeMode) -> Vec<Message> {
    let existing_iter = existing.iter().map(|m| (m, Origin::Existing));
    let incoming_iter = incoming.iter().map(|m| (m, Origin::Incoming));
    let sequence: Vec<(&Message, Origin)> = match mode {
        MergeMode::History => incoming_iter.chain(existing_iter).collect(),
        MergeMode::Live => existing_iter.chain(incoming_iter).collect(),
    };

    let mut slots: Vec<(Message, Origin)> = Vec::with_capacity(sequence.len());
    let mut positions: HashMap<&MessageId, usize> = HashMap::with_capacity(sequence.len());

    for (message, origin) in sequence {
        match positions.get(&message.id) {
            Some(&pos) => {
                let current = &slots[pos];
                if should_replace((&current.0, current.1), (message, origin)) {
                    slots[pos] = (message.clone(), origin);
                }
            }
            None => {
                positions.insert(&message.id, slots.len());
                slots.push((message.clone(), origin));
            }
        }
    }

    slots.into_iter().map(|(m, _)| m).collect()
}

/// Ordered, de-duplicated message list for one conversation or thread.
#[derive(Debug, Clone)]
pub struct MessageList {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    has_more: bool,
    in_flight: bool,
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageList {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            index: HashMap::new(),
            has_more: true,
            in_flight: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Oldest message, used as the cursor for the next history page.
    pub fn first(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
    }

    fn reindex(&mut self) {
        self.index = self
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
    }

    pub fn merge(&mut self, incoming: &[Message], mode: MergeMode) {
        if incoming.is_empty() {
            return;
        }
        self.messages = merge(&self.messages, incoming, mode);
        self.reindex();
    }

    /// Claim the single pagination slot. Returns `false` when history is
    /// exhausted or a page request is already outstanding.
    pub fn begin_page(&mut self) -> bool {
        if !self.has_more || self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn end_page(&mut self) {
        self.in_flight = false;
    }

    /// Merge a raw page from the service. Emptiness is judged before filtering.
    pub fn merge_history_page(
        &mut self,
        page: &[Message],
        filter: &impl MessageFilter,
    ) -> PageOutcome {
        if page.is_empty() {
            self.has_more = false;
            return PageOutcome::Exhausted;
        }
        let accepted: Vec<Message> = page.iter().filter(|m| filter.accepts(m)).cloned().collect();
        let count = accepted.len();
        self.merge(&accepted, MergeMode::History);
        PageOutcome::Merged { accepted: count }
    }

    /// Merge a single live event. Returns whether it passed the filter.
    pub fn merge_live(&mut self, message: &Message, filter: &impl MessageFilter) -> bool {
        if !filter.accepts(message) {
            return false;
        }
        self.merge(std::slice::from_ref(message), MergeMode::Live);
        true
    }

    /// Append a local optimistic echo.
    pub fn push_local(&mut self, message: Message) {
        self.merge(std::slice::from_ref(&message), MergeMode::Live);
    }

    /// Replace the message with `id` by `f(current)`, if `f` returns a value.
    pub fn update<F>(&mut self, id: &MessageId, f: F) -> bool
    where
        F: FnOnce(&Message) -> Option<Message>,
    {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        match f(&self.messages[pos]) {
            Some(next) => {
                self.messages[pos] = next;
                true
            }
            None => false,
        }
    }

    /// Apply an edit. Unknown ids and tombstones are left alone.
    pub fn apply_edit(&mut self, edited: &Message) -> bool {
        let applied = self.update(&edited.id, |current| {
            if current.is_tombstone() {
                None
            } else {
                Some(edited.clone())
            }
        });
        if !applied {
            debug!("Dropping edit for {}: unknown or deleted", edited.id);
        }
        applied
    }

    /// Tombstone the message with `id`. Unknown ids are dropped.
    pub fn apply_delete(&mut self, id: &MessageId, deleted_at: DateTime<Utc>) -> bool {
        let applied = self.update(id, |current| Some(current.tombstoned(deleted_at)));
        if !applied {
            debug!("Dropping delete for unknown message {}", id);
        }
        applied
    }

    /// Apply a deleted record from the service, keeping the local position.
    pub fn apply_deleted(&mut self, record: &Message) -> bool {
        let at = record.deleted_at.unwrap_or_else(Utc::now);
        let applied = self.update(&record.id, |_| Some(record.tombstoned(at)));
        if !applied {
            debug!("Dropping delete for unknown message {}", record.id);
        }
        applied
    }

    /// Supersede an optimistic echo with the service's confirmed record.
    ///
    /// If the confirmed id already arrived through the live stream, that
    /// copy is folded into the echo's position.
    pub fn replace_pending(&mut self, local_id: &MessageId, confirmed: Message) -> bool {
        let Some(&pos) = self.index.get(local_id) else {
            return false;
        };
        let confirmed = match self.get(&confirmed.id) {
            Some(live) if live.is_tombstone() => live.clone(),
            _ => confirmed,
        };
        let duplicate = self.index.get(&confirmed.id).copied();
        self.messages[pos] = confirmed;
        if let Some(dup) = duplicate
            && dup != pos
        {
            self.messages.remove(dup);
        }
        self.reindex();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupAction, MessageBody, Receiver};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, text: &str) -> Message {
        Message::text(id, "u1", Receiver::user("me"), text, at(1))
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn direct_filter() -> ConversationFilter {
        ConversationFilter::new(UserId::new("me"), Counterpart::user("u1"))
    }

    #[test]
    fn test_live_merge_appends_and_replaces_in_place() {
        let existing = vec![msg("1", "a"), msg("2", "b")];
        let incoming = vec![msg("2", "b-edited"), msg("3", "c")];

        let merged = merge(&existing, &incoming, MergeMode::Live);

        assert_eq!(ids(&merged), vec!["1", "2", "3"]);
        assert_eq!(merged[1].preview_text(), "b-edited");
    }

    #[test]
    fn test_history_merge_prepends_and_keeps_earliest_position() {
        let existing = vec![msg("3", "c"), msg("4", "d")];
        let page = vec![msg("1", "a"), msg("2", "b"), msg("3", "c-page")];

        let merged = merge(&existing, &page, MergeMode::History);

        assert_eq!(ids(&merged), vec!["1", "2", "3", "4"]);
        assert_eq!(merged[2].preview_text(), "c-page");
    }

    #[test]
    fn test_duplicate_delivery_collapses_to_one_entry() {
        let mut list = MessageList::new();
        let filter = direct_filter();
        list.merge_live(&msg("9", "pushed"), &filter);
        list.merge_history_page(&[msg("8", "old"), msg("9", "fetched")], &filter);

        assert_eq!(ids(list.messages()), vec!["8", "9"]);
        assert_eq!(list.get(&MessageId::new("9")).unwrap().preview_text(), "fetched");
    }

    #[test]
    fn test_merge_commutative_for_disjoint_ids() {
        let abc = vec![msg("a", "a"), msg("b", "b"), msg("c", "c")];
        let d = vec![msg("d", "d")];

        let first = merge(&merge(&[], &abc, MergeMode::Live), &d, MergeMode::Live);
        let second = merge(&merge(&[], &d, MergeMode::Live), &abc, MergeMode::Live);

        let first: HashSet<_> = first.into_iter().map(|m| m.id).collect();
        let second: HashSet<_> = second.into_iter().map(|m| m.id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn test_tombstone_is_not_resurrected_by_merge() {
        let dead = msg("5", "x").tombstoned(at(2));
        let merged = merge(&[dead], &[msg("5", "x")], MergeMode::Live);
        assert!(merged[0].is_tombstone());
    }

    #[test]
    fn test_empty_page_marks_history_exhausted() {
        let mut list = MessageList::new();
        list.merge_live(&msg("1", "a"), &direct_filter());
        assert!(list.has_more());

        let outcome = list.merge_history_page(&[], &direct_filter());

        assert_eq!(outcome, PageOutcome::Exhausted);
        assert!(!list.has_more());
        assert_eq!(list.len(), 1);
        assert!(!list.begin_page(), "no further fetch once exhausted");
    }

    #[test]
    fn test_page_filtered_to_nothing_is_not_exhaustion() {
        let mut list = MessageList::new();
        let foreign = Message::text("1", "u7", Receiver::user("me"), "x", at(1));

        let outcome = list.merge_history_page(&[foreign], &direct_filter());

        assert_eq!(outcome, PageOutcome::Merged { accepted: 0 });
        assert!(list.has_more());
    }

    #[test]
    fn test_second_page_request_dropped_while_in_flight() {
        let mut list = MessageList::new();
        assert!(list.begin_page());
        assert!(!list.begin_page());
        list.end_page();
        assert!(list.begin_page());
    }

    #[test]
    fn test_direct_filter_matches_both_directions_only() {
        let filter = direct_filter();
        let from_peer = Message::text("1", "u1", Receiver::user("me"), "a", at(1));
        let to_peer = Message::text("2", "me", Receiver::user("u1"), "b", at(2));
        let other_peer = Message::text("3", "u2", Receiver::user("me"), "c", at(3));
        let peer_to_other = Message::text("4", "u1", Receiver::user("u2"), "d", at(4));
        let group = Message::text("5", "u1", Receiver::group("u1"), "e", at(5));

        assert!(filter.accepts(&from_peer));
        assert!(filter.accepts(&to_peer));
        assert!(!filter.accepts(&other_peer));
        assert!(!filter.accepts(&peer_to_other));
        assert!(!filter.accepts(&group));
    }

    #[test]
    fn test_group_filter_and_action_messages() {
        let filter = ConversationFilter::new(UserId::new("me"), Counterpart::group("g1"));
        let in_group = Message::text("1", "u5", Receiver::group("g1"), "a", at(1));
        let other_group = Message::text("2", "u5", Receiver::group("g2"), "b", at(2));
        let action = Message::new(
            "3",
            "admin",
            Receiver::group("g1"),
            MessageBody::Action {
                action: GroupAction::Joined,
                actor: UserId::new("u9"),
                target: None,
            },
            at(3),
        );

        assert!(filter.accepts(&in_group));
        assert!(!filter.accepts(&other_group));
        assert!(filter.accepts(&action));
    }

    #[test]
    fn test_thread_replies_excluded_regardless_of_order() {
        let filter = direct_filter();
        let root = msg("10", "root");
        let reply = msg("11", "reply").with_parent("10");

        let mut list = MessageList::new();
        assert!(!list.merge_live(&reply, &filter));
        list.merge_history_page(&[root.clone(), reply.clone()], &filter);
        assert!(!list.merge_live(&reply, &filter));
        assert_eq!(ids(list.messages()), vec!["10"]);

        let mut thread = MessageList::new();
        thread.merge_history_page(&[root, reply], &ThreadFilter::new(MessageId::new("10")));
        assert_eq!(ids(thread.messages()), vec!["11"]);
    }

    #[test]
    fn test_edit_for_unknown_id_is_dropped() {
        let mut list = MessageList::new();
        assert!(!list.apply_edit(&msg("404", "ghost")));
        assert!(list.is_empty());
    }

    #[test]
    fn test_late_edit_after_delete_is_ignored() {
        let mut list = MessageList::new();
        list.merge_live(&msg("42", "original"), &direct_filter());

        assert!(list.apply_delete(&MessageId::new("42"), at(50)));
        assert!(!list.apply_edit(&msg("42", "edited late")));

        let m = list.get(&MessageId::new("42")).unwrap();
        assert!(m.is_tombstone());
        assert_eq!(m.deleted_at, Some(at(50)));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_replace_pending_keeps_position_and_drops_live_duplicate() {
        let mut list = MessageList::new();
        list.push_local(msg("0", "before"));
        list.push_local(msg("local-1", "hi"));
        list.merge(&[msg("100", "hi")], MergeMode::Live);

        assert!(list.replace_pending(&MessageId::new("local-1"), msg("100", "hi")));

        assert_eq!(ids(list.messages()), vec!["0", "100"]);
        assert!(!list.contains(&MessageId::new("local-1")));
    }
}
