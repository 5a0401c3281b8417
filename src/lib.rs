// Re-export the runtime-free core
pub use chatcore;
pub use chatcore::{format, reaction, receipt, reconcile};

// Domain types come from chatcore; events (with EventBus) live here with the tokio client
pub mod types {
    pub use chatcore::types::*;
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod features;
pub mod memory_service;
pub mod service;

pub use client::ChatClient;
pub use config::SyncConfig;
pub use conversation::{ConversationHandle, ThreadHandle};
pub use error::SyncError;
pub use memory_service::InMemoryService;
pub use service::{ChatService, ServiceError};
