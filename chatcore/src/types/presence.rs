use super::ids::{MessageId, Receiver, ReceiverKind, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

impl ReceiptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptKind::Delivered => "delivered",
            ReceiptKind::Read => "read",
        }
    }
}

/// A delivery or read acknowledgement for one message by one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: MessageId,
    pub kind: ReceiptKind,
    pub actor: UserId,
    pub timestamp: DateTime<Utc>,
    pub receiver_kind: ReceiverKind,
}

impl Receipt {
    pub fn new(
        message_id: impl Into<MessageId>,
        kind: ReceiptKind,
        actor: impl Into<UserId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            kind,
            actor: actor.into(),
            timestamp,
            receiver_kind: ReceiverKind::User,
        }
    }

    pub fn in_group(mut self) -> Self {
        self.receiver_kind = ReceiverKind::Group;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user: UserId,
    pub presence: Presence,
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Typing start/stop signal as delivered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub sender: UserId,
    pub sender_name: String,
    pub receiver: Receiver,
}
