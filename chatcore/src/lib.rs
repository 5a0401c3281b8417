pub mod call;
pub mod conversation;
pub mod error;
pub mod format;
pub mod group;
pub mod presence;
pub mod reaction;
pub mod receipt;
pub mod reconcile;
pub mod types;

pub use call::{CallAction, CallSession, CallState, CallTransition};
pub use conversation::{Conversation, ConversationIndex, ConversationRow};
pub use error::InvalidTransition;
pub use group::{GroupMember, GroupRoster, MemberScope, MembershipChange, membership_change};
pub use presence::{PresenceBoard, TypingBoard, UserPresence};
pub use reaction::{
    QUICK_REACTIONS, ReactionAction, ReactionChange, ReactionCommand, ReactionEvent, apply_reaction,
    reconcile_event,
};
pub use receipt::{DeliveryStatus, ReceiptOutcome, ReceiptTracker};
pub use reconcile::{ConversationFilter, MergeMode, MessageList, PageOutcome, ThreadFilter};
