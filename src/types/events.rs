use chatcore::CallState;
use chatcore::reaction::ReactionEvent;
use chatcore::types::{
    CallMediaType, Counterpart, GroupId, Message, MessageId, PresenceUpdate, Receipt, Receiver,
    SessionId, TypingIndicator, UserId,
};
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
pub const CHANNEL_CAPACITY: usize = 100;

/// Call lifecycle notifications from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    IncomingReceived {
        session_id: SessionId,
        caller: UserId,
        receiver: Receiver,
        media: CallMediaType,
    },
    OutgoingAccepted { session_id: SessionId },
    OutgoingRejected { session_id: SessionId },
    IncomingCancelled { session_id: SessionId },
    Ended { session_id: SessionId },
}

impl CallEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            CallEvent::IncomingReceived { session_id, .. }
            | CallEvent::OutgoingAccepted { session_id }
            | CallEvent::OutgoingRejected { session_id }
            | CallEvent::IncomingCancelled { session_id }
            | CallEvent::Ended { session_id } => session_id,
        }
    }
}

/// Inbound events, in the order the service delivers them (not necessarily
/// causal order).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MessageReceived(Message),
    /// Own message echoed back, e.g. sent from another device.
    MessageSent(Message),
    MessageEdited(Message),
    MessageDeleted(Message),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    Receipt(Receipt),
    TypingStarted(TypingIndicator),
    TypingEnded(TypingIndicator),
    Presence(PresenceUpdate),
    /// Membership change as an action message; also updates loaded rosters.
    GroupMembership(Message),
    Call(CallEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesChanged {
    pub conversation: Counterpart,
    pub ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadChanged {
    pub parent: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationsChanged;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingChanged {
    pub conversation: Counterpart,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChanged {
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembersChanged {
    pub group: GroupId,
}

/// `state` is `None` once the session is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallChanged {
    pub session_id: SessionId,
    pub state: Option<CallState>,
}

/// A call could not be joined; shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailed {
    pub session_id: SessionId,
    pub reason: String,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed view-update bus with a broadcast channel per update kind.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self::with_capacity(CHANNEL_CAPACITY)
            }

            pub fn with_capacity(capacity: usize) -> Self {
                Self {
                    $(
                        $field: broadcast::channel(capacity).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (messages, Arc<MessagesChanged>),
    (thread, Arc<ThreadChanged>),
    (conversations, Arc<ConversationsChanged>),
    (typing, Arc<TypingChanged>),
    (presence, Arc<PresenceChanged>),
    (members, Arc<MembersChanged>),
    (call, Arc<CallChanged>),
    (call_failed, Arc<CallFailed>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish without caring whether anyone listens.
pub(crate) fn publish<T>(sender: &broadcast::Sender<Arc<T>>, update: T) {
    let _ = sender.send(Arc::new(update));
}
