//! Call session coordination.
//!
//! The state machine itself lives in [`chatcore::call`]; this module owns the
//! single process-wide session and drives it from local actions and service
//! call events.
//!
//! - [`CallCoordinator`]: initiate, accept, reject, cancel, end and join
//! - [`JoinTarget`]: the two ways into a running session
//! - [`CallError`]: failures surfaced to callers

mod coordinator;
mod error;

pub use coordinator::{CallCoordinator, JoinTarget};
pub use error::CallError;
