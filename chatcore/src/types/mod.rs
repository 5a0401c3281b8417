pub mod call;
pub mod ids;
pub mod message;
pub mod presence;

pub use call::{CallDirection, CallMediaType, CallStatus, EndCallReason};
pub use ids::{Counterpart, GroupId, MessageId, Receiver, ReceiverKind, SessionId, UserId};
pub use message::{
    DELETED_PLACEHOLDER, EchoState, GROUP_CALL_CUSTOM_TYPE, GroupAction, GroupCallInvite,
    MediaKind, Message, MessageBody, MessageCategory, ReactionAggregate,
};
pub use presence::{Presence, PresenceUpdate, Receipt, ReceiptKind, TypingIndicator};
