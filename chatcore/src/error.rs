use thiserror::Error;

/// A call state transition that isn't allowed from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {attempted} in state {current_state}")]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}
