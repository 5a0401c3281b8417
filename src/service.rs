//! Port to the real-time chat service.

use async_trait::async_trait;
use chatcore::{Conversation, GroupMember};
use chatcore::types::{
    CallMediaType, CallStatus, Counterpart, GroupId, Message, MessageBody, MessageId, Presence,
    Receipt, Receiver, SessionId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rejected by service: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryScope {
    Conversation(Counterpart),
    Thread(MessageId),
}

/// One page request, walking backwards from `before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub scope: HistoryScope,
    pub before: Option<MessageId>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub receiver: Receiver,
    pub body: MessageBody,
    pub parent_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub presence: Presence,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProfile {
    pub id: GroupId,
    pub name: String,
    pub member_count: u32,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn fetch_previous_messages(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<Message>, ServiceError>;

    /// Send a message and return the record as stored by the service.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, ServiceError>;

    async fn edit_message(
        &self,
        id: &MessageId,
        body: &MessageBody,
    ) -> Result<Message, ServiceError>;

    /// Delete a message and return its tombstoned record.
    async fn delete_message(&self, id: &MessageId) -> Result<Message, ServiceError>;

    async fn add_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ServiceError>;

    async fn remove_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ServiceError>;

    async fn mark_delivered(&self, message: &Message) -> Result<(), ServiceError>;

    async fn mark_read(&self, message: &Message) -> Result<(), ServiceError>;

    async fn fetch_receipts(&self, id: &MessageId) -> Result<Vec<Receipt>, ServiceError>;

    async fn fetch_conversations(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>, ServiceError>;

    async fn fetch_user(&self, id: &UserId) -> Result<UserProfile, ServiceError>;

    async fn fetch_group(&self, id: &GroupId) -> Result<GroupProfile, ServiceError>;

    async fn fetch_group_members(
        &self,
        group: &GroupId,
        limit: usize,
    ) -> Result<Vec<GroupMember>, ServiceError>;

    /// Add users as participants and return the members actually added.
    async fn add_group_members(
        &self,
        group: &GroupId,
        users: &[UserId],
    ) -> Result<Vec<GroupMember>, ServiceError>;

    async fn kick_group_member(&self, group: &GroupId, user: &UserId) -> Result<(), ServiceError>;

    async fn leave_group(&self, group: &GroupId) -> Result<(), ServiceError>;

    async fn start_typing(&self, receiver: &Receiver) -> Result<(), ServiceError>;

    async fn end_typing(&self, receiver: &Receiver) -> Result<(), ServiceError>;

    async fn initiate_call(
        &self,
        receiver: &Receiver,
        media: CallMediaType,
    ) -> Result<SessionId, ServiceError>;

    async fn accept_call(&self, session_id: &SessionId) -> Result<(), ServiceError>;

    /// Reject an incoming call or cancel an outgoing one; `status` tells which.
    async fn reject_call(
        &self,
        session_id: &SessionId,
        status: CallStatus,
    ) -> Result<(), ServiceError>;

    async fn end_call(&self, session_id: &SessionId) -> Result<(), ServiceError>;

    async fn clear_active_call(&self) -> Result<(), ServiceError>;

    async fn generate_call_token(&self, session_id: &SessionId) -> Result<String, ServiceError>;
}
