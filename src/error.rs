use crate::calls::CallError;
use crate::service::ServiceError;
use chatcore::types::{Counterpart, MessageId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("conversation {0} is not open")]
    ConversationClosed(Counterpart),

    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("refusing to send an empty message")]
    EmptyMessage,

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error(transparent)]
    Call(#[from] CallError),
}
