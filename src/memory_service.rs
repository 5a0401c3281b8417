//! In-memory `ChatService` used by the demo binary and the tests.

use crate::service::{
    ChatService, GroupProfile, HistoryQuery, HistoryScope, OutgoingMessage, ServiceError,
    UserProfile,
};
use async_trait::async_trait;
use chatcore::reconcile::MessageFilter;
use chatcore::types::{
    CallMediaType, CallStatus, GroupId, Message, MessageBody, MessageId, Receipt, Receiver,
    SessionId, UserId,
};
use chatcore::{Conversation, ConversationFilter, GroupMember};
use chrono::Utc;
use dashmap::DashMap;
use log::debug;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One recorded service call: operation name plus its main argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub op: &'static str,
    pub target: String,
}

pub struct InMemoryService {
    local_user: UserId,
    messages: Mutex<Vec<Message>>,
    conversations: Mutex<Vec<Conversation>>,
    users: DashMap<UserId, UserProfile>,
    groups: DashMap<GroupId, GroupProfile>,
    members: DashMap<GroupId, Vec<GroupMember>>,
    receipts: DashMap<MessageId, Vec<Receipt>>,
    counters: DashMap<&'static str, usize>,
    failures: DashMap<&'static str, ServiceError>,
    scripted_pages: Mutex<VecDeque<Vec<Message>>>,
    log: Mutex<Vec<ServiceCall>>,
    next_id: AtomicU64,
    latency_ms: AtomicU64,
}

impl InMemoryService {
    pub fn new(local_user: impl Into<UserId>) -> Self {
        Self {
            local_user: local_user.into(),
            messages: Mutex::new(Vec::new()),
            conversations: Mutex::new(Vec::new()),
            users: DashMap::new(),
            groups: DashMap::new(),
            members: DashMap::new(),
            receipts: DashMap::new(),
            counters: DashMap::new(),
            failures: DashMap::new(),
            scripted_pages: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            latency_ms: AtomicU64::new(0),
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Store a message as if it had been sent earlier.
    pub fn insert_message(&self, message: Message) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        if let Ok(mut conversations) = self.conversations.lock() {
            conversations.push(conversation);
        }
    }

    pub fn insert_user(&self, profile: UserProfile) {
        self.users.insert(profile.id.clone(), profile);
    }

    pub fn insert_group(&self, profile: GroupProfile) {
        self.groups.insert(profile.id.clone(), profile);
    }

    pub fn insert_member(&self, group: impl Into<GroupId>, member: GroupMember) {
        self.members.entry(group.into()).or_default().push(member);
    }

    pub fn group_members(&self, group: &GroupId) -> Vec<GroupMember> {
        self.members
            .get(group)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    pub fn insert_receipt(&self, receipt: Receipt) {
        self.receipts
            .entry(receipt.message_id.clone())
            .or_default()
            .push(receipt);
    }

    /// Make the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: ServiceError) {
        self.failures.insert(op, error);
    }

    /// Serve `page` verbatim on the next history fetch, whatever the scope.
    pub fn script_page(&self, page: Vec<Message>) {
        if let Ok(mut pages) = self.scripted_pages.lock() {
            pages.push_back(page);
        }
    }

    /// How many times `op` was called.
    pub fn call_count(&self, op: &str) -> usize {
        self.counters.get(op).map(|c| *c.value()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.target)
            .collect()
    }

    pub fn stored_messages(&self) -> Vec<Message> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn record(&self, op: &'static str, target: impl ToString) -> Result<(), ServiceError> {
        *self.counters.entry(op).or_insert(0) += 1;
        if let Ok(mut log) = self.log.lock() {
            log.push(ServiceCall {
                op,
                target: target.to_string(),
            });
        }
        match self.failures.remove(op) {
            Some((_, error)) => {
                debug!("Scripted failure for {op}: {error}");
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Delay applied to history fetches and sends.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn update_message<F>(&self, id: &MessageId, f: F) -> Result<Message, ServiceError>
    where
        F: FnOnce(&Message) -> Message,
    {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| ServiceError::Network("message store poisoned".to_string()))?;
        let slot = messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        *slot = f(slot);
        Ok(slot.clone())
    }
}

fn page_before(matching: Vec<Message>, before: Option<&MessageId>, limit: usize) -> Vec<Message> {
    let end = before
        .and_then(|id| matching.iter().position(|m| &m.id == id))
        .unwrap_or(matching.len());
    let start = end.saturating_sub(limit);
    matching[start..end].to_vec()
}

#[async_trait]
impl ChatService for InMemoryService {
    async fn fetch_previous_messages(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<Message>, ServiceError> {
        self.record("fetch_previous_messages", format!("{:?}", query.scope))?;
        self.simulate_latency().await;
        if let Some(page) = self.scripted_pages.lock().ok().and_then(|mut p| p.pop_front()) {
            return Ok(page);
        }
        let stored = self.stored_messages();
        let matching: Vec<Message> = match &query.scope {
            HistoryScope::Conversation(counterpart) => {
                let filter = ConversationFilter::new(self.local_user.clone(), counterpart.clone());
                stored.into_iter().filter(|m| filter.accepts(m)).collect()
            }
            HistoryScope::Thread(parent) => stored
                .into_iter()
                .filter(|m| m.parent_id.as_ref() == Some(parent))
                .collect(),
        };
        Ok(page_before(matching, query.before.as_ref(), query.limit))
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, ServiceError> {
        self.record("send_message", &message.receiver.id)?;
        self.simulate_latency().await;
        let mut stored = Message::new(
            self.next_id().to_string(),
            self.local_user.clone(),
            message.receiver.clone(),
            message.body.clone(),
            Utc::now(),
        );
        stored.parent_id = message.parent_id.clone();
        self.insert_message(stored.clone());
        Ok(stored)
    }

    async fn edit_message(
        &self,
        id: &MessageId,
        body: &MessageBody,
    ) -> Result<Message, ServiceError> {
        self.record("edit_message", id)?;
        self.update_message(id, |m| Message {
            body: body.clone(),
            edited_at: Some(Utc::now()),
            ..m.clone()
        })
    }

    async fn delete_message(&self, id: &MessageId) -> Result<Message, ServiceError> {
        self.record("delete_message", id)?;
        self.update_message(id, |m| m.tombstoned(Utc::now()))
    }

    async fn add_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ServiceError> {
        self.record("add_reaction", format!("{id}:{emoji}"))
    }

    async fn remove_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ServiceError> {
        self.record("remove_reaction", format!("{id}:{emoji}"))
    }

    async fn mark_delivered(&self, message: &Message) -> Result<(), ServiceError> {
        self.record("mark_delivered", &message.id)
    }

    async fn mark_read(&self, message: &Message) -> Result<(), ServiceError> {
        self.record("mark_read", &message.id)
    }

    async fn fetch_receipts(&self, id: &MessageId) -> Result<Vec<Receipt>, ServiceError> {
        self.record("fetch_receipts", id)?;
        Ok(self.receipts.get(id).map(|r| r.value().clone()).unwrap_or_default())
    }

    async fn fetch_conversations(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>, ServiceError> {
        self.record("fetch_conversations", page)?;
        let conversations = self
            .conversations
            .lock()
            .map_err(|_| ServiceError::Network("conversation store poisoned".to_string()))?;
        Ok(conversations
            .iter()
            .skip(page * limit)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_user(&self, id: &UserId) -> Result<UserProfile, ServiceError> {
        self.record("fetch_user", id)?;
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    async fn fetch_group(&self, id: &GroupId) -> Result<GroupProfile, ServiceError> {
        self.record("fetch_group", id)?;
        self.groups
            .get(id)
            .map(|g| g.value().clone())
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    async fn fetch_group_members(
        &self,
        group: &GroupId,
        limit: usize,
    ) -> Result<Vec<GroupMember>, ServiceError> {
        self.record("fetch_group_members", group)?;
        if !self.groups.contains_key(group) {
            return Err(ServiceError::NotFound(group.to_string()));
        }
        Ok(self.group_members(group).into_iter().take(limit).collect())
    }

    async fn add_group_members(
        &self,
        group: &GroupId,
        users: &[UserId],
    ) -> Result<Vec<GroupMember>, ServiceError> {
        let targets: Vec<&str> = users.iter().map(UserId::as_str).collect();
        self.record("add_group_members", format!("{group}:{}", targets.join(",")))?;
        let mut members = self.members.entry(group.clone()).or_default();
        let mut added = Vec::new();
        for user in users {
            if members.iter().any(|m| &m.user == user) {
                continue;
            }
            let name = self
                .users
                .get(user)
                .map(|u| u.name.clone())
                .unwrap_or_else(|| user.to_string());
            let member = GroupMember::participant(user.clone(), name);
            members.push(member.clone());
            added.push(member);
        }
        Ok(added)
    }

    async fn kick_group_member(&self, group: &GroupId, user: &UserId) -> Result<(), ServiceError> {
        self.record("kick_group_member", format!("{group}:{user}"))?;
        let mut members = self
            .members
            .get_mut(group)
            .ok_or_else(|| ServiceError::NotFound(group.to_string()))?;
        let before = members.len();
        members.retain(|m| &m.user != user);
        if members.len() == before {
            return Err(ServiceError::NotFound(user.to_string()));
        }
        Ok(())
    }

    async fn leave_group(&self, group: &GroupId) -> Result<(), ServiceError> {
        self.record("leave_group", group)?;
        if let Some(mut members) = self.members.get_mut(group) {
            members.retain(|m| m.user != self.local_user);
        }
        Ok(())
    }

    async fn start_typing(&self, receiver: &Receiver) -> Result<(), ServiceError> {
        self.record("start_typing", &receiver.id)
    }

    async fn end_typing(&self, receiver: &Receiver) -> Result<(), ServiceError> {
        self.record("end_typing", &receiver.id)
    }

    async fn initiate_call(
        &self,
        receiver: &Receiver,
        media: CallMediaType,
    ) -> Result<SessionId, ServiceError> {
        self.record("initiate_call", format!("{}:{media}", receiver.id))?;
        Ok(SessionId::new(format!("session-{}", self.next_id())))
    }

    async fn accept_call(&self, session_id: &SessionId) -> Result<(), ServiceError> {
        self.record("accept_call", session_id)
    }

    async fn reject_call(
        &self,
        session_id: &SessionId,
        status: CallStatus,
    ) -> Result<(), ServiceError> {
        self.record("reject_call", format!("{session_id}:{}", status.label()))
    }

    async fn end_call(&self, session_id: &SessionId) -> Result<(), ServiceError> {
        self.record("end_call", session_id)
    }

    async fn clear_active_call(&self) -> Result<(), ServiceError> {
        self.record("clear_active_call", "")
    }

    async fn generate_call_token(&self, session_id: &SessionId) -> Result<String, ServiceError> {
        self.record("generate_call_token", session_id)?;
        Ok(format!("token-{session_id}"))
    }
}
