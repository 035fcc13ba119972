// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod memory;
mod message;
mod session;

pub use memory::MemoryStore;
pub use message::{
    BinaryPart, ContentPart, FinishReason, Message, Role, ToolCallPart, ToolResultPart,
};
pub use session::Session;

use async_trait::async_trait;

/// Store failures.  Fatal to an agent run — the loop cannot make progress
/// without persisting state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// CRUD over sessions.  Implementations must be safe under concurrent
/// callers; change events are published on the store's session broker.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, parent_session_id: Option<String>) -> Result<Session>;
    async fn get_session(&self, id: &str) -> Result<Session>;
    async fn list_sessions(&self) -> Result<Vec<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn delete_session(&self, id: &str) -> Result<()>;
}

/// CRUD over messages.  `list_messages` returns messages in creation order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: Message) -> Result<Message>;
    async fn get_message(&self, id: &str) -> Result<Message>;
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn update_message(&self, message: &Message) -> Result<()>;
    async fn delete_message(&self, id: &str) -> Result<()>;
    async fn delete_session_messages(&self, session_id: &str) -> Result<()>;
}
