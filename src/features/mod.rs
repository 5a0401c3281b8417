mod chatstate;
mod groups;

pub use chatstate::{ChatStateType, TypingNotifier};
pub use groups::Groups;
