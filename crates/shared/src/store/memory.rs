//! In-memory conversation store
//!
//! Every operation takes the same mutex, so `start_conversation` is trivially
//! atomic with respect to other callers.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::ConversationStore;
use crate::error::StoreError;
use crate::types::{
    Conversation, ConversationId, ConversationStatus, Message, MessageId, NewMessage,
    SenderIdentity, StartOutcome, UserId,
};

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
}

impl Tables {
    fn open_for(&self, owner: UserId) -> Option<&Conversation> {
        self.conversations
            .values()
            .filter(|c| c.owner_id == owner && !c.status.is_terminal())
            .max_by_key(|c| c.created_at)
    }

    fn insert_message(&mut self, message: NewMessage) -> Message {
        let message = Message {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            is_system: message.is_system,
            is_admin: message.is_admin,
            created_at: OffsetDateTime::now_utc(),
        };
        self.messages.push(message.clone());
        message
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    tables: Mutex<Tables>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted messages across all conversations
    pub async fn message_count(&self) -> usize {
        self.tables.lock().await.messages.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        let status = tables
            .conversations
            .get(&message.conversation_id)
            .map(|c| c.status)
            .ok_or(StoreError::NotFound(message.conversation_id))?;
        if status.is_terminal() {
            return Err(StoreError::Closed(message.conversation_id));
        }
        Ok(tables.insert_message(message))
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.tables
            .lock()
            .await
            .conversations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_conversation_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
        assigned_admin: Option<UserId>,
    ) -> Result<Conversation, StoreError> {
        let mut tables = self.tables.lock().await;
        let conversation = tables
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;

        if !conversation.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: conversation.status,
                to: status,
            });
        }

        conversation.status = status;
        if assigned_admin.is_some() {
            conversation.assigned_admin_id = assigned_admin;
        }
        conversation.updated_at = OffsetDateTime::now_utc();
        Ok(conversation.clone())
    }

    async fn find_open_conversation_by_owner(
        &self,
        owner: UserId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.tables.lock().await.open_for(owner).cloned())
    }

    async fn start_conversation(
        &self,
        starter: SenderIdentity,
        label: &str,
        content: &str,
    ) -> Result<StartOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.open_for(starter.user_id) {
            return Ok(StartOutcome::AlreadyOpen(existing.clone()));
        }

        let now = OffsetDateTime::now_utc();
        let conversation = Conversation {
            id: ConversationId::new(),
            owner_id: starter.user_id,
            assigned_admin_id: None,
            label: label.to_string(),
            status: ConversationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables
            .conversations
            .insert(conversation.id, conversation.clone());

        let message = tables.insert_message(NewMessage::from_sender(conversation.id, &starter, content));

        Ok(StartOutcome::Created {
            conversation,
            message,
        })
    }

    async fn list_active_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.lock().await;
        let mut active: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| !c.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(active)
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.lock().await;
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(StoreError::NotFound(conversation_id));
        }

        // Insertion order is send order
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}
