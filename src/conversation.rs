//! Subscription handles for an open conversation or reply thread.
//!
//! A handle keeps its message list alive in the [`ChatClient`]. Dropping the
//! last handle for a conversation releases the list and revokes the pending
//! typing timer, so nothing keeps mutating a view that is gone.

use crate::client::{ChatClient, ListKey};
use crate::error::SyncError;
use crate::features::TypingNotifier;
use chatcore::reaction::{ReactionAction, ReactionChange};
use chatcore::types::{
    CallMediaType, Counterpart, MediaKind, Message, MessageBody, MessageId, ReactionAggregate,
    Receiver, UserId,
};
use chatcore::{CallSession, DeliveryStatus, PageOutcome};
use std::sync::Arc;

pub struct ConversationHandle {
    client: Arc<ChatClient>,
    counterpart: Counterpart,
    key: ListKey,
    typing: TypingNotifier,
}

impl ConversationHandle {
    pub(crate) fn new(client: Arc<ChatClient>, counterpart: Counterpart, typing: TypingNotifier) -> Self {
        Self {
            key: ListKey::Conversation(counterpart.clone()),
            client,
            counterpart,
            typing,
        }
    }

    pub fn counterpart(&self) -> &Counterpart {
        &self.counterpart
    }

    pub fn messages(&self) -> Vec<Message> {
        self.client.messages(&self.key)
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.messages().into_iter().find(|m| &m.id == id)
    }

    pub fn has_more(&self) -> bool {
        self.client.has_more(&self.key)
    }

    pub fn is_fetching(&self) -> bool {
        self.client.is_fetching(&self.key)
    }

    /// Status icon state of one of our own messages.
    pub fn status(&self, id: &MessageId) -> Option<DeliveryStatus> {
        self.client.status(&self.counterpart, id)
    }

    pub fn reactions(&self, id: &MessageId) -> Vec<ReactionAggregate> {
        self.message(id).map(|m| m.reactions).unwrap_or_default()
    }

    /// Group members that have read `id`.
    pub fn readers(&self, id: &MessageId) -> Vec<UserId> {
        self.client.readers(&self.counterpart, id)
    }

    pub fn typing_label(&self) -> Option<String> {
        self.client.typing_label(&self.counterpart)
    }

    pub async fn load_older(&self) -> Result<Option<PageOutcome>, SyncError> {
        self.client.load_older(&self.key).await
    }

    pub async fn send_text(&self, text: &str) -> Result<Message, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.typing.stop().await;
        self.client
            .send_body(&self.key, MessageBody::text(text.trim()))
            .await
    }

    pub async fn send_media(
        &self,
        url: &str,
        mime_type: &str,
        caption: Option<&str>,
    ) -> Result<Message, SyncError> {
        self.typing.stop().await;
        let body = MessageBody::Media {
            kind: MediaKind::from_mime(mime_type),
            url: url.to_string(),
            mime_type: mime_type.to_string(),
            caption: caption.map(str::to_string),
        };
        self.client.send_body(&self.key, body).await
    }

    pub async fn send_custom(
        &self,
        custom_type: &str,
        data: serde_json::Value,
    ) -> Result<Message, SyncError> {
        self.typing.stop().await;
        let body = MessageBody::Custom {
            custom_type: custom_type.to_string(),
            data,
        };
        self.client.send_body(&self.key, body).await
    }

    pub async fn keystroke(&self) {
        self.typing.keystroke().await;
    }

    pub async fn stop_typing(&self) {
        self.typing.stop().await;
    }

    pub async fn react(
        &self,
        id: &MessageId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionChange, SyncError> {
        self.client.react(id, emoji, action).await
    }

    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<Message, SyncError> {
        self.client.edit(id, text).await
    }

    pub async fn delete(&self, id: &MessageId) -> Result<Message, SyncError> {
        self.client.delete(id).await
    }

    /// Mark everything read now, bypassing the settle delay.
    pub async fn mark_read(&self) -> Result<bool, SyncError> {
        self.client.mark_read(&self.counterpart).await
    }

    /// Ring a user directly, or start a group call and post its invite.
    pub async fn start_call(&self, media: CallMediaType) -> Result<CallSession, SyncError> {
        match &self.counterpart {
            Counterpart::User(_) => Ok(self
                .client
                .calls()
                .initiate(Receiver::from(&self.counterpart), media)
                .await?),
            Counterpart::Group(_) => {
                self.client
                    .start_group_call(&self.key, &self.counterpart, media)
                    .await
            }
        }
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}

pub struct ThreadHandle {
    client: Arc<ChatClient>,
    parent: MessageId,
    key: ListKey,
}

impl ThreadHandle {
    pub(crate) fn new(client: Arc<ChatClient>, parent: MessageId) -> Self {
        Self {
            key: ListKey::Thread(parent.clone()),
            client,
            parent,
        }
    }

    pub fn parent(&self) -> &MessageId {
        &self.parent
    }

    pub fn messages(&self) -> Vec<Message> {
        self.client.messages(&self.key)
    }

    pub fn has_more(&self) -> bool {
        self.client.has_more(&self.key)
    }

    pub fn is_fetching(&self) -> bool {
        self.client.is_fetching(&self.key)
    }

    pub async fn load_older(&self) -> Result<Option<PageOutcome>, SyncError> {
        self.client.load_older(&self.key).await
    }

    pub async fn send_text(&self, text: &str) -> Result<Message, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        self.client
            .send_body(&self.key, MessageBody::text(text.trim()))
            .await
    }

    pub async fn react(
        &self,
        id: &MessageId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionChange, SyncError> {
        self.client.react(id, emoji, action).await
    }

    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<Message, SyncError> {
        self.client.edit(id, text).await
    }

    pub async fn delete(&self, id: &MessageId) -> Result<Message, SyncError> {
        self.client.delete(id).await
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.client.release(&self.key);
    }
}
