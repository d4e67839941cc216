//! Conversation persistence
//!
//! The real-time hub only ever talks to [`ConversationStore`]; it never
//! touches SQL directly. Two implementations are provided:
//!
//! - [`PgConversationStore`]: PostgreSQL via sqlx, used in production
//! - [`InMemoryConversationStore`]: a single mutex-guarded map, used by tests
//!   and by local runs without a database

mod memory;
mod postgres;

pub use memory::InMemoryConversationStore;
pub use postgres::PgConversationStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    Conversation, ConversationId, ConversationStatus, Message, NewMessage, SenderIdentity,
    StartOutcome, UserId,
};

/// Persistence operations consumed by the hub and the HTTP layer
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a message; the store assigns its id and timestamp.
    ///
    /// The status check and the insert are one atomic step: a message for a
    /// closed conversation fails with [`StoreError::Closed`] even when the
    /// close lands after the caller last read the conversation.
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    /// Move a conversation to `status`.
    ///
    /// The store re-checks the transition against the current row, so a
    /// closed conversation can never be reopened even when two writers race.
    /// `assigned_admin` is recorded when given and left untouched otherwise.
    async fn update_conversation_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        assigned_admin: Option<UserId>,
    ) -> Result<Conversation, StoreError>;

    /// The owner's pending or open conversation, if any
    async fn find_open_conversation_by_owner(
        &self,
        owner: UserId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Atomically create a pending conversation owned by `starter` with its
    /// opening message, unless the starter already has a non-closed one.
    /// The message flags follow the starter's role.
    async fn start_conversation(
        &self,
        starter: SenderIdentity,
        label: &str,
        content: &str,
    ) -> Result<StartOutcome, StoreError>;

    /// All non-closed conversations, most recently updated first
    async fn list_active_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    /// Messages of one conversation in send order
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, StoreError>;
}
