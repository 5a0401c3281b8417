//! Delivery and read receipts.

use crate::reconcile::MessageList;
use crate::types::{EchoState, Message, MessageId, Receipt, ReceiptKind, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Single status icon derived for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// The send call failed; the echo stays until the user retries.
    Failed,
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            DeliveryStatus::Failed => "⚠",
            DeliveryStatus::Sent => "✔",
            DeliveryStatus::Delivered | DeliveryStatus::Read => "✔✔",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Applied,
    /// Equal or earlier than what is already recorded.
    Stale,
    UnknownMessage,
    Tombstoned,
}

/// Advance the receipt timestamp on `message`, monotonically.
///
/// Returns `None` when the receipt changes nothing: the message is a
/// tombstone, or the recorded timestamp is already equal or later.
pub fn apply_receipt(message: &Message, receipt: &Receipt) -> Option<Message> {
    if message.is_tombstone() {
        return None;
    }
    let current = match receipt.kind {
        ReceiptKind::Delivered => message.delivered_at,
        ReceiptKind::Read => message.read_at,
    };
    if current.is_some_and(|c| c >= receipt.timestamp) {
        return None;
    }
    Some(match receipt.kind {
        ReceiptKind::Delivered => message.with_delivered_at(receipt.timestamp),
        ReceiptKind::Read => message.with_read_at(receipt.timestamp),
    })
}

/// Applies receipts to a message list and keeps a per-recipient log for
/// group conversations.
#[derive(Debug, Clone, Default)]
pub struct ReceiptTracker {
    log: HashMap<MessageId, Vec<Receipt>>,
}

impl ReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest receipt per `(actor, kind)`. Returns whether it changed.
    fn record(&mut self, receipt: &Receipt) -> bool {
        let entries = self.log.entry(receipt.message_id.clone()).or_default();
        match entries
            .iter_mut()
            .find(|r| r.actor == receipt.actor && r.kind == receipt.kind)
        {
            Some(existing) if existing.timestamp >= receipt.timestamp => false,
            Some(existing) => {
                existing.timestamp = receipt.timestamp;
                true
            }
            None => {
                entries.push(receipt.clone());
                true
            }
        }
    }

    pub fn apply(
        &mut self,
        list: &mut MessageList,
        receipt: &Receipt,
        is_group: bool,
    ) -> ReceiptOutcome {
        let Some(message) = list.get(&receipt.message_id) else {
            return ReceiptOutcome::UnknownMessage;
        };
        if message.is_tombstone() {
            return ReceiptOutcome::Tombstoned;
        }

        let logged = is_group && self.record(receipt);
        let applied = list.update(&receipt.message_id, |m| apply_receipt(m, receipt));

        if applied || logged {
            ReceiptOutcome::Applied
        } else {
            ReceiptOutcome::Stale
        }
    }

    pub fn receipts(&self, id: &MessageId) -> &[Receipt] {
        self.log.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    fn actors(&self, id: &MessageId, kind: ReceiptKind) -> Vec<&UserId> {
        self.receipts(id)
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| &r.actor)
            .collect()
    }

    /// Group members that have read the message.
    pub fn readers(&self, id: &MessageId) -> Vec<&UserId> {
        self.actors(id, ReceiptKind::Read)
    }

    /// Group members the message was delivered to.
    pub fn recipients(&self, id: &MessageId) -> Vec<&UserId> {
        self.actors(id, ReceiptKind::Delivered)
    }

    /// Status icon for an outgoing message, `None` for incoming or deleted ones.
    /// An unconfirmed echo already shows as sent.
    pub fn status(&self, message: &Message, local_user: &UserId) -> Option<DeliveryStatus> {
        if !message.is_from(local_user) || message.is_tombstone() {
            return None;
        }
        match message.echo {
            Some(EchoState::Pending) => return Some(DeliveryStatus::Sent),
            Some(EchoState::Failed) => return Some(DeliveryStatus::Failed),
            None => {}
        }
        let logged = self.receipts(&message.id);
        let has = |kind: ReceiptKind| logged.iter().any(|r| r.kind == kind);

        if message.read_at.is_some() || has(ReceiptKind::Read) {
            Some(DeliveryStatus::Read)
        } else if message.delivered_at.is_some() || has(ReceiptKind::Delivered) {
            Some(DeliveryStatus::Delivered)
        } else {
            Some(DeliveryStatus::Sent)
        }
    }
}

/// Latest incoming message the service hasn't seen a delivery ack for.
pub fn last_undelivered_incoming<'a>(
    messages: &'a [Message],
    local_user: &UserId,
) -> Option<&'a Message> {
    messages
        .iter()
        .rev()
        .find(|m| !m.is_from(local_user) && m.delivered_at.is_none())
}

/// Latest incoming message not yet marked read.
pub fn last_unread_incoming<'a>(
    messages: &'a [Message],
    local_user: &UserId,
) -> Option<&'a Message> {
    messages
        .iter()
        .rev()
        .find(|m| !m.is_from(local_user) && m.read_at.is_none())
}

/// Mark every unread incoming message as read at `at`. Returns how many changed.
pub fn mark_read_locally(list: &mut MessageList, local_user: &UserId, at: DateTime<Utc>) -> usize {
    let unread: Vec<MessageId> = list
        .messages()
        .iter()
        .filter(|m| !m.is_from(local_user) && m.read_at.is_none() && !m.is_tombstone())
        .map(|m| m.id.clone())
        .collect();
    unread
        .iter()
        .filter(|id| list.update(id, |m| Some(m.with_read_at(at))))
        .count()
}
