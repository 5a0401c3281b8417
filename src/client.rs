use crate::calls::{CallCoordinator, JoinTarget};
use crate::config::SyncConfig;
use crate::conversation::{ConversationHandle, ThreadHandle};
use crate::error::SyncError;
use crate::features::TypingNotifier;
use crate::service::{ChatService, HistoryQuery, HistoryScope, OutgoingMessage};
use crate::types::events::{
    ConversationsChanged, Event, EventBus, MembersChanged, MessagesChanged, PresenceChanged,
    ThreadChanged, TypingChanged, publish,
};
use chatcore::reaction::{ReactionAction, ReactionChange, ReactionEvent, apply_reaction, reconcile_event};
use chatcore::receipt::{
    apply_receipt, last_undelivered_incoming, last_unread_incoming, mark_read_locally,
};
use chatcore::reconcile::MessageFilter;
use chatcore::types::{
    CallMediaType, Counterpart, EchoState, GroupCallInvite, GroupId, Message, MessageBody,
    MessageCategory, MessageId, PresenceUpdate, Receipt, Receiver, SessionId, TypingIndicator,
    UserId,
};
use chatcore::{
    CallAction, CallSession, Conversation, ConversationFilter, ConversationIndex, ConversationRow,
    DeliveryStatus, GroupRoster, MessageList, PageOutcome, PresenceBoard, ReceiptTracker,
    ThreadFilter, TypingBoard, UserPresence, membership_change,
};
use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which open message list an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ListKey {
    Conversation(Counterpart),
    Thread(MessageId),
}

impl ListKey {
    fn scope(&self) -> HistoryScope {
        match self {
            ListKey::Conversation(c) => HistoryScope::Conversation(c.clone()),
            ListKey::Thread(p) => HistoryScope::Thread(p.clone()),
        }
    }

    fn closed(&self) -> SyncError {
        match self {
            ListKey::Conversation(c) => SyncError::ConversationClosed(c.clone()),
            ListKey::Thread(p) => SyncError::NotFound(p.clone()),
        }
    }
}

struct OpenConversation {
    list: MessageList,
    receipts: ReceiptTracker,
    filter: ConversationFilter,
    handles: usize,
    mark_read_pending: bool,
}

struct OpenThread {
    list: MessageList,
    filter: ThreadFilter,
    receiver: Receiver,
    handles: usize,
}

#[derive(Default)]
struct SyncState {
    conversations: ConversationIndex,
    conversation_pages: usize,
    typing: TypingBoard,
    presence: PresenceBoard,
    open: HashMap<Counterpart, OpenConversation>,
    threads: HashMap<MessageId, OpenThread>,
    /// Loaded group rosters; events for other groups are not tracked.
    rosters: HashMap<GroupId, GroupRoster>,
}

impl SyncState {
    fn list(&self, key: &ListKey) -> Option<&MessageList> {
        match key {
            ListKey::Conversation(c) => self.open.get(c).map(|o| &o.list),
            ListKey::Thread(p) => self.threads.get(p).map(|t| &t.list),
        }
    }

    fn list_mut(&mut self, key: &ListKey) -> Option<&mut MessageList> {
        match key {
            ListKey::Conversation(c) => self.open.get_mut(c).map(|o| &mut o.list),
            ListKey::Thread(p) => self.threads.get_mut(p).map(|t| &mut t.list),
        }
    }

    fn lists_mut(&mut self) -> impl Iterator<Item = &mut MessageList> {
        self.open
            .values_mut()
            .map(|o| &mut o.list)
            .chain(self.threads.values_mut().map(|t| &mut t.list))
    }

    fn find(&self, id: &MessageId) -> Option<&Message> {
        self.open
            .values()
            .map(|o| &o.list)
            .chain(self.threads.values().map(|t| &t.list))
            .find_map(|l| l.get(id))
    }
}

/// Session client: keeps the local view of conversations, messages, typing,
/// presence and the active call in sync with the chat service.
pub struct ChatClient {
    local_user: UserId,
    service: Arc<dyn ChatService>,
    config: SyncConfig,
    events: Arc<EventBus>,
    calls: CallCoordinator,
    state: Mutex<SyncState>,
}

impl ChatClient {
    pub fn new(local_user: UserId, service: Arc<dyn ChatService>, config: SyncConfig) -> Arc<Self> {
        let events = Arc::new(EventBus::with_capacity(config.event_channel_capacity));
        Arc::new(Self {
            calls: CallCoordinator::new(local_user.clone(), service.clone(), events.clone()),
            local_user,
            service,
            config,
            events,
            state: Mutex::new(SyncState::default()),
        })
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }

    pub(crate) fn service(&self) -> &Arc<dyn ChatService> {
        &self.service
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_list(&self, key: &ListKey, ids: Vec<MessageId>) {
        match key {
            ListKey::Conversation(c) => publish(
                &self.events.messages,
                MessagesChanged {
                    conversation: c.clone(),
                    ids,
                },
            ),
            ListKey::Thread(p) => publish(&self.events.thread, ThreadChanged { parent: p.clone() }),
        }
    }

    fn publish_message(&self, message: &Message) {
        let key = match &message.parent_id {
            Some(parent) => ListKey::Thread(parent.clone()),
            None => ListKey::Conversation(message.counterpart(&self.local_user)),
        };
        self.publish_list(&key, vec![message.id.clone()]);
    }

    fn publish_conversations(&self) {
        publish(&self.events.conversations, ConversationsChanged);
    }

    fn publish_members(&self, group: &GroupId) {
        publish(&self.events.members, MembersChanged { group: group.clone() });
    }

    // Conversation list

    pub async fn load_conversations(&self) -> Result<usize, SyncError> {
        let page = self
            .service
            .fetch_conversations(0, self.config.conversation_page_size)
            .await
            .inspect_err(|e| warn!("Failed to fetch conversations: {e}"))?;
        let count = page.len();
        {
            let mut state = self.state();
            state.conversations = ConversationIndex::load(page);
            state.conversation_pages = 1;
        }
        info!("Loaded {count} conversations");
        self.publish_conversations();
        Ok(count)
    }

    /// Fetch the next page of conversations. Returns how many arrived.
    pub async fn load_more_conversations(&self) -> Result<usize, SyncError> {
        let page_index = self.state().conversation_pages;
        let page = self
            .service
            .fetch_conversations(page_index, self.config.conversation_page_size)
            .await
            .inspect_err(|e| warn!("Failed to fetch conversation page {page_index}: {e}"))?;
        let count = page.len();
        if count > 0 {
            let mut state = self.state();
            state.conversations.extend_page(page);
            state.conversation_pages = page_index + 1;
            drop(state);
            self.publish_conversations();
        }
        Ok(count)
    }

    pub fn conversation_rows(&self) -> Vec<ConversationRow> {
        let state = self.state();
        state.conversations.rows(&state.typing)
    }

    pub fn conversation(&self, counterpart: &Counterpart) -> Option<Conversation> {
        self.state().conversations.get(counterpart).cloned()
    }

    pub fn typing_label(&self, conversation: &Counterpart) -> Option<String> {
        self.state().typing.label(conversation).map(str::to_string)
    }

    pub fn presence(&self, user: &UserId) -> Option<UserPresence> {
        self.state().presence.get(user)
    }

    pub fn presence_label<Tz>(&self, user: &UserId, now: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        self.state().presence.label(user, now)
    }

    // Subscriptions

    /// Open a conversation view. The returned handle keeps the message list
    /// alive; dropping the last handle releases it.
    pub async fn open_conversation(self: &Arc<Self>, counterpart: Counterpart) -> ConversationHandle {
        {
            let mut state = self.state();
            let local_user = self.local_user.clone();
            state
                .open
                .entry(counterpart.clone())
                .or_insert_with(|| OpenConversation {
                    list: MessageList::new(),
                    receipts: ReceiptTracker::new(),
                    filter: ConversationFilter::new(local_user, counterpart.clone()),
                    handles: 0,
                    mark_read_pending: false,
                })
                .handles += 1;
        }

        match &counterpart {
            Counterpart::User(user) => match self.service.fetch_user(user).await {
                Ok(profile) => {
                    let update = PresenceUpdate {
                        user: profile.id,
                        presence: profile.presence,
                        last_active_at: profile.last_active_at,
                    };
                    if self.state().presence.apply(&update) {
                        publish(&self.events.presence, PresenceChanged { user: user.clone() });
                    }
                }
                Err(e) => warn!("Failed to fetch profile of {user}: {e}"),
            },
            Counterpart::Group(group) => match self.service.fetch_group(group).await {
                Ok(profile) => debug!(
                    "Opened group {} ({} members)",
                    profile.name, profile.member_count
                ),
                Err(e) => warn!("Failed to fetch group {group}: {e}"),
            },
        }

        let typing = TypingNotifier::new(
            self.service.clone(),
            Receiver::from(&counterpart),
            self.config.typing_stop_delay,
        );
        ConversationHandle::new(self.clone(), counterpart, typing)
    }

    /// Open the reply thread under `parent`.
    pub fn open_thread(self: &Arc<Self>, parent: &Message) -> ThreadHandle {
        self.state()
            .threads
            .entry(parent.id.clone())
            .or_insert_with(|| OpenThread {
                list: MessageList::new(),
                filter: ThreadFilter::new(parent.id.clone()),
                receiver: Receiver::from(&parent.counterpart(&self.local_user)),
                handles: 0,
            })
            .handles += 1;
        ThreadHandle::new(self.clone(), parent.id.clone())
    }

    pub(crate) fn release(&self, key: &ListKey) {
        let mut guard = self.state();
        let state = &mut *guard;
        match key {
            ListKey::Conversation(c) => {
                if let Some(open) = state.open.get_mut(c) {
                    open.handles = open.handles.saturating_sub(1);
                    if open.handles == 0 {
                        debug!("Releasing conversation {c}");
                        state.open.remove(c);
                    }
                }
            }
            ListKey::Thread(p) => {
                if let Some(thread) = state.threads.get_mut(p) {
                    thread.handles = thread.handles.saturating_sub(1);
                    if thread.handles == 0 {
                        debug!("Releasing thread {p}");
                        state.threads.remove(p);
                    }
                }
            }
        }
    }

    // Group rosters

    pub(crate) fn roster(&self, group: &GroupId) -> Option<GroupRoster> {
        self.state().rosters.get(group).cloned()
    }

    pub(crate) fn set_roster(&self, group: &GroupId, roster: GroupRoster) {
        self.state().rosters.insert(group.clone(), roster);
        self.publish_members(group);
    }

    /// Run `f` on a loaded roster; publishes when it reports a change.
    pub(crate) fn update_roster(
        &self,
        group: &GroupId,
        f: impl FnOnce(&mut GroupRoster) -> bool,
    ) -> bool {
        let changed = self.state().rosters.get_mut(group).is_some_and(f);
        if changed {
            self.publish_members(group);
        }
        changed
    }

    /// Drop everything kept for a group the local user left.
    pub(crate) fn forget_group(&self, group: &GroupId) {
        let counterpart = Counterpart::Group(group.clone());
        let (roster, conversation) = {
            let mut state = self.state();
            (
                state.rosters.remove(group).is_some(),
                state.conversations.remove(&counterpart).is_some(),
            )
        };
        if roster {
            self.publish_members(group);
        }
        if conversation {
            self.publish_conversations();
        }
    }

    // Reads over open lists

    pub(crate) fn messages(&self, key: &ListKey) -> Vec<Message> {
        self.state()
            .list(key)
            .map(|l| l.messages().to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn has_more(&self, key: &ListKey) -> bool {
        self.state().list(key).is_some_and(MessageList::has_more)
    }

    pub(crate) fn is_fetching(&self, key: &ListKey) -> bool {
        self.state().list(key).is_some_and(MessageList::is_fetching)
    }

    pub fn find_message(&self, id: &MessageId) -> Option<Message> {
        self.state().find(id).cloned()
    }

    pub(crate) fn status(&self, counterpart: &Counterpart, id: &MessageId) -> Option<DeliveryStatus> {
        let state = self.state();
        let open = state.open.get(counterpart)?;
        let message = open.list.get(id)?;
        open.receipts.status(message, &self.local_user)
    }

    pub(crate) fn readers(&self, counterpart: &Counterpart, id: &MessageId) -> Vec<UserId> {
        self.state()
            .open
            .get(counterpart)
            .map(|o| o.receipts.readers(id).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    // History

    /// Load one older page into the list. Returns `None` when the request was
    /// dropped because history is exhausted or a page is already in flight.
    pub(crate) async fn load_older(
        self: &Arc<Self>,
        key: &ListKey,
    ) -> Result<Option<PageOutcome>, SyncError> {
        let before = {
            let mut state = self.state();
            let list = state.list_mut(key).ok_or_else(|| key.closed())?;
            if !list.begin_page() {
                debug!("Skipping page request for {key:?}");
                return Ok(None);
            }
            list.first().map(|m| m.id.clone())
        };
        let _guard = scopeguard::guard((self.clone(), key.clone()), |(client, key)| {
            if let Some(list) = client.state().list_mut(&key) {
                list.end_page();
            }
        });

        let query = HistoryQuery {
            scope: key.scope(),
            before,
            limit: self.config.history_page_size,
        };
        let page = self
            .service
            .fetch_previous_messages(&query)
            .await
            .inspect_err(|e| warn!("Failed to fetch history for {key:?}: {e}"))?;

        let (outcome, accepted) = {
            let mut state = self.state();
            match key {
                ListKey::Conversation(c) => {
                    let open = state.open.get_mut(c).ok_or_else(|| key.closed())?;
                    let accepted: Vec<Message> = page
                        .iter()
                        .filter(|m| open.filter.accepts(m))
                        .cloned()
                        .collect();
                    (open.list.merge_history_page(&page, &open.filter), accepted)
                }
                ListKey::Thread(p) => {
                    let thread = state.threads.get_mut(p).ok_or_else(|| key.closed())?;
                    (thread.list.merge_history_page(&page, &thread.filter), Vec::new())
                }
            }
        };
        debug!("History page for {key:?}: {outcome:?}");
        self.publish_list(key, page.iter().map(|m| m.id.clone()).collect());

        if let ListKey::Conversation(counterpart) = key
            && !page.is_empty()
        {
            self.acknowledge_page(counterpart, &accepted).await;
            self.schedule_mark_read(counterpart);
        }
        Ok(Some(outcome))
    }

    /// Ack delivery of the newest incoming message and pull receipts of our
    /// own messages, over the part of the page the list accepted.
    async fn acknowledge_page(&self, counterpart: &Counterpart, page: &[Message]) {
        if let Some(undelivered) = last_undelivered_incoming(page, &self.local_user)
            && let Err(e) = self.service.mark_delivered(undelivered).await
        {
            warn!("Failed to mark {} as delivered: {e}", undelivered.id);
        }

        let own: Vec<&MessageId> = page
            .iter()
            .filter(|m| {
                m.is_from(&self.local_user)
                    && !m.is_tombstone()
                    && !matches!(m.category(), MessageCategory::Action | MessageCategory::Call)
            })
            .map(|m| &m.id)
            .collect();
        if own.is_empty() {
            return;
        }

        let fetched = join_all(own.iter().map(|id| self.service.fetch_receipts(id))).await;
        let receipts: Vec<Receipt> = fetched
            .into_iter()
            .zip(&own)
            .filter_map(|(result, id)| {
                result
                    .inspect_err(|e| warn!("Failed to fetch receipts for {id}: {e}"))
                    .ok()
            })
            .flatten()
            .collect();

        let mut changed = Vec::new();
        {
            let mut state = self.state();
            let Some(open) = state.open.get_mut(counterpart) else {
                return;
            };
            for receipt in &receipts {
                if open.receipts.apply(&mut open.list, receipt, counterpart.is_group())
                    == chatcore::ReceiptOutcome::Applied
                {
                    changed.push(receipt.message_id.clone());
                }
            }
        }
        if !changed.is_empty() {
            self.publish_list(&ListKey::Conversation(counterpart.clone()), changed);
        }
    }

    // Read state

    pub(crate) fn schedule_mark_read(self: &Arc<Self>, counterpart: &Counterpart) {
        {
            let mut state = self.state();
            let Some(open) = state.open.get_mut(counterpart) else {
                return;
            };
            if open.mark_read_pending {
                return;
            }
            open.mark_read_pending = true;
        }

        let client = self.clone();
        let counterpart = counterpart.clone();
        let delay = self.config.mark_read_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = client.state();
                if let Some(open) = state.open.get_mut(&counterpart) {
                    open.mark_read_pending = false;
                }
            }
            match client.mark_read(&counterpart).await {
                Ok(_) | Err(SyncError::ConversationClosed(_)) => {}
                Err(e) => warn!("Deferred mark-read for {counterpart} failed: {e}"),
            }
        });
    }

    /// Mark the conversation read: every unread incoming message locally, and
    /// the newest one remotely. Local state is not rolled back on failure.
    pub(crate) async fn mark_read(&self, counterpart: &Counterpart) -> Result<bool, SyncError> {
        let (target, changed) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let open = state
                .open
                .get_mut(counterpart)
                .ok_or_else(|| SyncError::ConversationClosed(counterpart.clone()))?;
            let target = last_unread_incoming(open.list.messages(), &self.local_user).cloned();
            let marked = mark_read_locally(&mut open.list, &self.local_user, Utc::now());
            let cleared = state.conversations.mark_read(counterpart);
            (target, marked > 0 || cleared)
        };
        if changed {
            self.publish_list(&ListKey::Conversation(counterpart.clone()), Vec::new());
            self.publish_conversations();
        }

        if let Some(target) = target
            && !counterpart.is_group()
        {
            self.service
                .mark_read(&target)
                .await
                .inspect_err(|e| warn!("Failed to mark {} as read: {e}", target.id))?;
        }
        Ok(changed)
    }

    // Writes

    /// Send with an optimistic echo that the confirmed record replaces.
    pub(crate) async fn send_body(
        &self,
        key: &ListKey,
        body: MessageBody,
    ) -> Result<Message, SyncError> {
        let (receiver, parent_id) = match key {
            ListKey::Conversation(c) => (Receiver::from(c), None),
            ListKey::Thread(p) => {
                let receiver = self
                    .state()
                    .threads
                    .get(p)
                    .map(|t| t.receiver.clone())
                    .ok_or_else(|| key.closed())?;
                (receiver, Some(p.clone()))
            }
        };

        let local_id = MessageId::new(format!("local-{:016x}", rand::random::<u64>()));
        let mut echo = Message::new(
            local_id.clone(),
            self.local_user.clone(),
            receiver.clone(),
            body.clone(),
            Utc::now(),
        )
        .with_echo(Some(EchoState::Pending));
        echo.parent_id = parent_id.clone();

        {
            let mut guard = self.state();
            let state = &mut *guard;
            let list = state.list_mut(key).ok_or_else(|| key.closed())?;
            list.push_local(echo.clone());
            state.conversations.on_message(&echo, &self.local_user);
        }
        self.publish_list(key, vec![local_id.clone()]);
        self.publish_conversations();

        let outgoing = OutgoingMessage {
            receiver,
            body,
            parent_id,
        };
        match self.service.send_message(&outgoing).await {
            Ok(confirmed) => {
                {
                    let mut guard = self.state();
                    let state = &mut *guard;
                    if let Some(list) = state.list_mut(key) {
                        list.replace_pending(&local_id, confirmed.clone());
                    }
                    state
                        .conversations
                        .on_message_updated(&local_id, &confirmed, &self.local_user);
                }
                self.publish_list(key, vec![confirmed.id.clone()]);
                self.publish_conversations();
                Ok(confirmed)
            }
            Err(e) => {
                warn!("Failed to send message to {}: {e}", outgoing.receiver.id);
                if let Some(list) = self.state().list_mut(key) {
                    list.update(&local_id, |m| Some(m.with_echo(Some(EchoState::Failed))));
                }
                self.publish_list(key, vec![local_id]);
                Err(e.into())
            }
        }
    }

    pub(crate) async fn react(
        &self,
        id: &MessageId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionChange, SyncError> {
        let (change, message) = {
            let mut state = self.state();
            let current = state
                .find(id)
                .cloned()
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            let change = apply_reaction(&current.reactions, emoji, action);
            if change.is_noop() {
                return Ok(change);
            }
            for list in state.lists_mut() {
                list.update(id, |m| Some(m.with_reactions(change.reactions.clone())));
            }
            (change, current)
        };
        self.publish_message(&message);

        let mut first_error = None;
        for command in &change.commands {
            let result = match command.action {
                ReactionAction::Add => self.service.add_reaction(id, &command.emoji).await,
                ReactionAction::Remove => self.service.remove_reaction(id, &command.emoji).await,
            };
            if let Err(e) = result {
                warn!("Failed to {:?} reaction {} on {id}: {e}", command.action, command.emoji);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(change),
        }
    }

    pub(crate) async fn edit(&self, id: &MessageId, text: &str) -> Result<Message, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let edited = self
            .service
            .edit_message(id, &MessageBody::text(text))
            .await
            .inspect_err(|e| warn!("Failed to edit {id}: {e}"))?;
        self.on_edited(&edited);
        Ok(edited)
    }

    pub(crate) async fn delete(&self, id: &MessageId) -> Result<Message, SyncError> {
        let record = self
            .service
            .delete_message(id)
            .await
            .inspect_err(|e| warn!("Failed to delete {id}: {e}"))?;
        self.on_deleted(&record);
        Ok(record)
    }

    // Calls

    pub async fn call_session(&self) -> Option<CallSession> {
        self.calls.session().await
    }

    pub async fn permitted_call_actions(&self) -> Vec<CallAction> {
        self.calls.permitted_actions().await
    }

    /// Join the call announced by a `group_call` message.
    pub async fn join_call_from_message(&self, message: &Message) -> Result<CallSession, SyncError> {
        let invite = message
            .group_call_invite()
            .ok_or_else(|| SyncError::NotFound(message.id.clone()))?;
        let session = self
            .calls
            .join(JoinTarget::Direct {
                session_id: invite.session_id,
                media: invite.media,
                receiver: message.receiver.clone(),
            })
            .await?;
        Ok(session)
    }

    /// Start a group call: join a fresh session, then invite the group.
    pub(crate) async fn start_group_call(
        &self,
        key: &ListKey,
        group: &Counterpart,
        media: CallMediaType,
    ) -> Result<CallSession, SyncError> {
        let session_id = SessionId::new(format!("call_{}", Utc::now().timestamp_millis()));
        let session = self
            .calls
            .join(JoinTarget::Direct {
                session_id: session_id.clone(),
                media,
                receiver: Receiver::from(group),
            })
            .await?;
        self.send_body(key, GroupCallInvite::new(session_id, media).into_body())
            .await?;
        Ok(session)
    }

    // Inbound events

    /// Spawn a pump feeding `events` into [`ChatClient::handle_event`].
    pub fn run_events(self: &Arc<Self>, mut events: mpsc::Receiver<Event>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.handle_event(event).await;
            }
            info!("Event stream closed");
        })
    }

    pub async fn handle_event(self: &Arc<Self>, event: Event) {
        match event {
            Event::MessageReceived(message)
            | Event::MessageSent(message)
            | Event::GroupMembership(message) => self.on_live_message(&message),
            Event::MessageEdited(message) => self.on_edited(&message),
            Event::MessageDeleted(message) => self.on_deleted(&message),
            Event::ReactionAdded(reaction) | Event::ReactionRemoved(reaction) => {
                self.on_reaction(&reaction)
            }
            Event::Receipt(receipt) => self.on_receipt(&receipt),
            Event::TypingStarted(indicator) => self.on_typing(&indicator, true),
            Event::TypingEnded(indicator) => self.on_typing(&indicator, false),
            Event::Presence(update) => {
                if self.state().presence.apply(&update) {
                    publish(&self.events.presence, PresenceChanged { user: update.user });
                }
            }
            Event::Call(call) => {
                if let Err(e) = self.calls.handle_event(call).await {
                    warn!("Failed to handle call event: {e}");
                }
            }
        }
    }

    fn on_live_message(self: &Arc<Self>, message: &Message) {
        let counterpart = message.counterpart(&self.local_user);
        let (merged, bumped) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let merged = match &message.parent_id {
                Some(parent) => state
                    .threads
                    .get_mut(parent)
                    .is_some_and(|t| t.list.merge_live(message, &t.filter)),
                None => state
                    .open
                    .get_mut(&counterpart)
                    .is_some_and(|o| o.list.merge_live(message, &o.filter)),
            };
            let bumped = state.conversations.on_message(message, &self.local_user);
            (merged, bumped)
        };

        if merged {
            self.publish_message(message);
            if message.parent_id.is_none() && !message.is_from(&self.local_user) {
                self.schedule_mark_read(&counterpart);
            }
        }
        if bumped {
            self.publish_conversations();
        }

        if let Some((group, change)) = membership_change(message) {
            let at = message.sent_at;
            if !self.update_roster(&group, |roster| roster.apply(&change, at)) {
                debug!("Membership change {change:?} left roster of {group} unchanged");
            }
        }
    }

    fn on_edited(&self, message: &Message) {
        let (applied, preview) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let mut applied = false;
            for list in state.lists_mut().filter(|l| l.contains(&message.id)) {
                applied |= list.apply_edit(message);
            }
            let preview = state
                .conversations
                .on_message_updated(&message.id, message, &self.local_user);
            (applied, preview)
        };
        if applied {
            self.publish_message(message);
        } else {
            debug!("Edit for {} matched no open list", message.id);
        }
        if preview {
            self.publish_conversations();
        }
    }

    fn on_deleted(&self, record: &Message) {
        let (applied, preview) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let mut applied = false;
            for list in state.lists_mut().filter(|l| l.contains(&record.id)) {
                applied |= list.apply_deleted(record);
            }
            let tombstone = record.tombstoned(record.deleted_at.unwrap_or_else(Utc::now));
            let preview = state
                .conversations
                .on_message_updated(&record.id, &tombstone, &self.local_user);
            (applied, preview)
        };
        if applied {
            self.publish_message(record);
        }
        if preview {
            self.publish_conversations();
        }
    }

    fn on_reaction(&self, reaction: &ReactionEvent) {
        let updated = {
            let mut state = self.state();
            let mut updated = None;
            for list in state.lists_mut() {
                let next = list
                    .get(&reaction.message_id)
                    .and_then(|m| reconcile_event(&m.reactions, reaction, &self.local_user));
                if let Some(next) = next {
                    list.update(&reaction.message_id, |m| Some(m.with_reactions(next)));
                    updated = list.get(&reaction.message_id).cloned();
                }
            }
            updated
        };
        match updated {
            Some(message) => self.publish_message(&message),
            None => debug!("Reaction on {} changed nothing", reaction.message_id),
        }
    }

    fn on_receipt(&self, receipt: &Receipt) {
        let mut touched = Vec::new();
        {
            let mut guard = self.state();
            let state = &mut *guard;
            for (counterpart, open) in state.open.iter_mut() {
                if !open.list.contains(&receipt.message_id) {
                    continue;
                }
                let outcome = open.receipts.apply(&mut open.list, receipt, counterpart.is_group());
                debug!("Receipt {:?} for {}: {outcome:?}", receipt.kind, receipt.message_id);
                if outcome == chatcore::ReceiptOutcome::Applied {
                    touched.push(ListKey::Conversation(counterpart.clone()));
                }
            }
            for (parent, thread) in state.threads.iter_mut() {
                if thread
                    .list
                    .update(&receipt.message_id, |m| apply_receipt(m, receipt))
                {
                    touched.push(ListKey::Thread(parent.clone()));
                }
            }
        }
        for key in &touched {
            self.publish_list(key, vec![receipt.message_id.clone()]);
        }
    }

    fn on_typing(&self, indicator: &TypingIndicator, started: bool) {
        if indicator.sender == self.local_user {
            return;
        }
        let change = {
            let mut state = self.state();
            let key = if started {
                state.typing.start(indicator)
            } else {
                state.typing.stop(indicator)
            };
            key.map(|k| {
                let label = state.typing.label(&k).map(str::to_string);
                (k, label)
            })
        };
        if let Some((conversation, label)) = change {
            publish(&self.events.typing, TypingChanged { conversation, label });
            self.publish_conversations();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_service::InMemoryService;
    use chatcore::types::ReceiptKind;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryService>, Arc<ChatClient>) {
        let service = Arc::new(InMemoryService::new("me"));
        let client = ChatClient::new(UserId::new("me"), service.clone(), SyncConfig::default());
        (service, client)
    }

    fn incoming(id: &str, from: &str, text: &str, secs: i64) -> Message {
        Message::text(id, from, Receiver::user("me"), text, at(secs))
    }

    #[tokio::test]
    async fn test_live_message_merges_only_into_its_conversation() {
        let (_service, client) = setup();
        let with_u1 = client.open_conversation(Counterpart::user("u1")).await;
        let with_u2 = client.open_conversation(Counterpart::user("u2")).await;

        client
            .handle_event(Event::MessageReceived(incoming("1", "u1", "hi", 1)))
            .await;

        assert_eq!(with_u1.messages().len(), 1);
        assert!(with_u2.messages().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_for_unknown_message_is_dropped() {
        let (_service, client) = setup();
        let handle = client.open_conversation(Counterpart::user("u1")).await;
        client
            .handle_event(Event::Receipt(Receipt::new("404", ReceiptKind::Read, "u1", at(5))))
            .await;
        assert!(handle.messages().is_empty());
    }

    #[tokio::test]
    async fn test_own_typing_echo_is_ignored() {
        let (_service, client) = setup();
        let indicator = TypingIndicator {
            sender: UserId::new("me"),
            sender_name: "Me".into(),
            receiver: Receiver::user("u1"),
        };
        client.handle_event(Event::TypingStarted(indicator)).await;
        assert_eq!(client.typing_label(&Counterpart::user("me")), None);
        assert_eq!(client.typing_label(&Counterpart::user("u1")), None);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_releases_list() {
        let (_service, client) = setup();
        let first = client.open_conversation(Counterpart::user("u1")).await;
        let second = client.open_conversation(Counterpart::user("u1")).await;
        client
            .handle_event(Event::MessageReceived(incoming("1", "u1", "hi", 1)))
            .await;

        drop(first);
        assert_eq!(second.messages().len(), 1);
        drop(second);

        let reopened = client.open_conversation(Counterpart::user("u1")).await;
        assert!(reopened.messages().is_empty());
        assert!(reopened.has_more());
    }
}
