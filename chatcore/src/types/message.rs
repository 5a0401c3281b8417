use super::call::{CallMediaType, CallStatus};
use super::ids::{Counterpart, GroupId, MessageId, Receiver, ReceiverKind, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Text shown in place of a deleted message's payload.
pub const DELETED_PLACEHOLDER: &str = "This message has been deleted";

/// Custom message type used to invite a group into a call session.
pub const GROUP_CALL_CUSTOM_TYPE: &str = "group_call";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCategory {
    Text,
    Media,
    Custom,
    Action,
    Call,
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageCategory::Text => "text",
            MessageCategory::Media => "media",
            MessageCategory::Custom => "custom",
            MessageCategory::Action => "action",
            MessageCategory::Call => "call",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    /// Infer the media kind from a MIME type, falling back to a plain file.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            MediaKind::Image
        } else if mime_type.starts_with("video/") {
            MediaKind::Video
        } else if mime_type.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::File
        }
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            MediaKind::Image => "📷 Photo",
            MediaKind::Video => "🎥 Video",
            MediaKind::Audio => "🎤 Audio",
            MediaKind::File => "📄 File",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupAction {
    Joined,
    Left,
    Added,
    Removed,
    Kicked,
    Banned,
    Unbanned,
}

impl GroupAction {
    fn verb(&self) -> &'static str {
        match self {
            GroupAction::Joined => "joined",
            GroupAction::Left => "left",
            GroupAction::Added => "added",
            GroupAction::Removed => "removed",
            GroupAction::Kicked => "kicked",
            GroupAction::Banned => "banned",
            GroupAction::Unbanned => "unbanned",
        }
    }
}

/// Payload of a message, discriminated by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        url: String,
        mime_type: String,
        caption: Option<String>,
    },
    Custom {
        custom_type: String,
        data: serde_json::Value,
    },
    Action {
        action: GroupAction,
        actor: UserId,
        target: Option<UserId>,
    },
    Call {
        media: CallMediaType,
        status: CallStatus,
    },
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    pub fn category(&self) -> MessageCategory {
        match self {
            MessageBody::Text { .. } => MessageCategory::Text,
            MessageBody::Media { .. } => MessageCategory::Media,
            MessageBody::Custom { .. } => MessageCategory::Custom,
            MessageBody::Action { .. } => MessageCategory::Action,
            MessageBody::Call { .. } => MessageCategory::Call,
        }
    }
}

/// Decoded payload of a `group_call` custom message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCallInvite {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    #[serde(rename = "callType")]
    pub media: CallMediaType,
    #[serde(default)]
    pub message: String,
}

impl GroupCallInvite {
    pub fn new(session_id: SessionId, media: CallMediaType) -> Self {
        Self {
            session_id,
            media,
            message: "Click to join the call".to_string(),
        }
    }

    pub fn into_body(self) -> MessageBody {
        MessageBody::Custom {
            custom_type: GROUP_CALL_CUSTOM_TYPE.to_string(),
            data: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

/// Aggregated count of one emoji on one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAggregate {
    pub emoji: String,
    pub count: u32,
    pub reacted_by_me: bool,
}

impl ReactionAggregate {
    pub fn new(emoji: impl Into<String>, count: u32, reacted_by_me: bool) -> Self {
        Self {
            emoji: emoji.into(),
            count,
            reacted_by_me,
        }
    }
}

/// Local-only state of an optimistic echo that the service hasn't confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoState {
    Pending,
    Failed,
}

/// A chat message as mirrored locally.
///
/// Values are never mutated through shared references: every update goes
/// through one of the `with_*` builders and produces a new value that
/// replaces the old one by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub receiver: Receiver,
    pub sender: UserId,
    pub sender_name: Option<String>,
    pub body: MessageBody,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub parent_id: Option<MessageId>,
    pub reactions: Vec<ReactionAggregate>,
    pub echo: Option<EchoState>,
}

impl Message {
    pub fn new(
        id: impl Into<MessageId>,
        sender: impl Into<UserId>,
        receiver: Receiver,
        body: MessageBody,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            receiver,
            sender: sender.into(),
            sender_name: None,
            body,
            sent_at,
            delivered_at: None,
            read_at: None,
            edited_at: None,
            deleted_at: None,
            parent_id: None,
            reactions: Vec::new(),
            echo: None,
        }
    }

    pub fn text(
        id: impl Into<MessageId>,
        sender: impl Into<UserId>,
        receiver: Receiver,
        text: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self::new(id, sender, receiver, MessageBody::text(text), sent_at)
    }

    pub fn category(&self) -> MessageCategory {
        self.body.category()
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_thread_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender == user
    }

    pub fn is_pending(&self) -> bool {
        self.echo == Some(EchoState::Pending)
    }

    /// The conversation this message belongs to, from `local_user`'s side.
    pub fn counterpart(&self, local_user: &UserId) -> Counterpart {
        match self.receiver.kind {
            ReceiverKind::Group => Counterpart::Group(GroupId::new(self.receiver.id.clone())),
            ReceiverKind::User if self.is_from(local_user) => {
                Counterpart::User(UserId::new(self.receiver.id.clone()))
            }
            ReceiverKind::User => Counterpart::User(self.sender.clone()),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<MessageId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_reactions(&self, reactions: Vec<ReactionAggregate>) -> Self {
        Self {
            reactions,
            ..self.clone()
        }
    }

    pub fn with_delivered_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            delivered_at: Some(at),
            ..self.clone()
        }
    }

    pub fn with_read_at(&self, at: DateTime<Utc>) -> Self {
        Self {
            read_at: Some(at),
            ..self.clone()
        }
    }

    pub fn with_echo(&self, echo: Option<EchoState>) -> Self {
        Self {
            echo,
            ..self.clone()
        }
    }

    /// A tombstone of this message: payload kept for identity, never rendered.
    pub fn tombstoned(&self, at: DateTime<Utc>) -> Self {
        Self {
            deleted_at: Some(self.deleted_at.unwrap_or(at)),
            ..self.clone()
        }
    }

    pub fn group_call_invite(&self) -> Option<GroupCallInvite> {
        match &self.body {
            MessageBody::Custom { custom_type, data } if custom_type == GROUP_CALL_CUSTOM_TYPE => {
                serde_json::from_value(data.clone()).ok()
            }
            _ => None,
        }
    }

    /// Preview text for conversation rows and thread lists.
    pub fn preview_text(&self) -> String {
        if self.is_tombstone() {
            return DELETED_PLACEHOLDER.to_string();
        }
        match &self.body {
            MessageBody::Text { text } => text.clone(),
            MessageBody::Media { kind, caption, .. } => match caption.as_deref() {
                Some(c) if !c.is_empty() => format!("{} {}", kind.display_label(), c),
                _ => kind.display_label().to_string(),
            },
            MessageBody::Custom { custom_type, .. } => match self.group_call_invite() {
                Some(invite) => format!("📞 Group {}", invite.media.label().to_lowercase()),
                None => format!("Custom {}", custom_type),
            },
            MessageBody::Action {
                action,
                actor,
                target,
            } => match target {
                Some(target) => format!("{} {} {}", actor, action.verb(), target),
                None => format!("{} {}", actor, action.verb()),
            },
            MessageBody::Call { media, status } => {
                format!("{}: {}", media.label(), status.label())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_counterpart_accounts_for_direction() {
        let me = UserId::new("me");
        let outgoing = Message::text("1", "me", Receiver::user("u1"), "hi", at(1));
        let incoming = Message::text("2", "u1", Receiver::user("me"), "hey", at(2));
        let group = Message::text("3", "u2", Receiver::group("g1"), "yo", at(3));

        assert_eq!(outgoing.counterpart(&me), Counterpart::user("u1"));
        assert_eq!(incoming.counterpart(&me), Counterpart::user("u1"));
        assert_eq!(group.counterpart(&me), Counterpart::group("g1"));
    }

    #[test]
    fn test_tombstone_suppresses_payload_but_keeps_identity() {
        let msg = Message::text("42", "me", Receiver::user("u1"), "secret", at(10));
        let dead = msg.tombstoned(at(20));

        assert!(dead.is_tombstone());
        assert_eq!(dead.id, msg.id);
        assert_eq!(dead.sent_at, msg.sent_at);
        assert_eq!(dead.preview_text(), DELETED_PLACEHOLDER);
        // Original value is untouched.
        assert!(!msg.is_tombstone());
    }

    #[test]
    fn test_tombstone_keeps_first_deletion_time() {
        let msg = Message::text("1", "me", Receiver::user("u1"), "x", at(1)).tombstoned(at(5));
        assert_eq!(msg.tombstoned(at(9)).deleted_at, Some(at(5)));
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::File);
    }

    #[test]
    fn test_group_call_invite_round_trips_through_custom_body() {
        let invite = GroupCallInvite::new(SessionId::new("call_1700"), CallMediaType::Video);
        let msg = Message::new(
            "7",
            "me",
            Receiver::group("g1"),
            invite.clone().into_body(),
            at(1),
        );

        assert_eq!(msg.category(), MessageCategory::Custom);
        assert_eq!(msg.group_call_invite(), Some(invite));
        assert_eq!(msg.preview_text(), "📞 Group video call");
    }

    #[test]
    fn test_preview_text_per_category() {
        let media = Message::new(
            "1",
            "u1",
            Receiver::user("me"),
            MessageBody::Media {
                kind: MediaKind::Image,
                url: "https://cdn/x.png".into(),
                mime_type: "image/png".into(),
                caption: Some("look".into()),
            },
            at(1),
        );
        assert_eq!(media.preview_text(), "📷 Photo look");

        let action = Message::new(
            "2",
            "admin",
            Receiver::group("g1"),
            MessageBody::Action {
                action: GroupAction::Added,
                actor: UserId::new("admin"),
                target: Some(UserId::new("u3")),
            },
            at(2),
        );
        assert_eq!(action.preview_text(), "admin added u3");

        let call = Message::new(
            "3",
            "u1",
            Receiver::user("me"),
            MessageBody::Call {
                media: CallMediaType::Audio,
                status: CallStatus::Unanswered,
            },
            at(3),
        );
        assert_eq!(call.preview_text(), "Audio Call: Missed Call");
    }
}
