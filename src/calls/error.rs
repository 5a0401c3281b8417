//! Call-related error types.

use crate::service::ServiceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("no active call session")]
    NoActiveSession,

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] chatcore::InvalidTransition),

    #[error("could not obtain call join token: {0}")]
    JoinToken(ServiceError),

    #[error("call service error: {0}")]
    Service(#[from] ServiceError),
}
