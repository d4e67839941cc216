//! Conversation lifecycle: pending → open → closed
//!
//! - pending → open when an admin, superadmin or system party joins the room
//!   or sends its first message there
//! - pending/open → closed on an explicit close by the owner or an admin
//! - closed is terminal
//!
//! Every transition is persisted first and then announced to the admin
//! broadcast room as a one-element summary array.

use std::sync::Arc;

use uuid::Uuid;

use supportline_shared::{
    Conversation, ConversationId, ConversationStatus, ConversationStore, SenderIdentity,
    StoreError, UserId,
};

use crate::websocket::events::{encode, ConversationSummary};
use crate::websocket::room::RoomRegistry;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Conversation {0} is closed")]
    Closed(ConversationId),

    #[error("Not allowed to close this conversation")]
    Forbidden,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ConversationStatus,
        to: ConversationStatus,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            StoreError::Closed(id) => Self::Closed(id),
            other => Self::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct ConversationLifecycle {
    store: Arc<dyn ConversationStore>,
    registry: RoomRegistry,
}

impl ConversationLifecycle {
    pub fn new(store: Arc<dyn ConversationStore>, registry: RoomRegistry) -> Self {
        Self { store, registry }
    }

    /// Closed conversations take no further messages
    pub fn ensure_accepts_messages(&self, conversation: &Conversation) -> Result<(), LifecycleError> {
        if conversation.status.is_terminal() {
            return Err(LifecycleError::Closed(conversation.id));
        }
        Ok(())
    }

    /// Called once a connection has joined a conversation room.
    /// Returns the updated conversation when this join opened it.
    pub async fn on_member_joined(
        &self,
        conversation_id: ConversationId,
        identity: &SenderIdentity,
    ) -> Result<Option<Conversation>, LifecycleError> {
        if !identity.role.opens_conversations() {
            return Ok(None);
        }
        let conversation = self.store.get_conversation(conversation_id).await?;
        self.open_if_pending(&conversation, identity).await
    }

    /// Called after a message from `identity` was persisted in `conversation`
    pub async fn on_message(
        &self,
        conversation: &Conversation,
        identity: &SenderIdentity,
    ) -> Result<Option<Conversation>, LifecycleError> {
        self.open_if_pending(conversation, identity).await
    }

    /// Explicit close by the owner or any admin
    pub async fn close(
        &self,
        conversation_id: ConversationId,
        identity: &SenderIdentity,
    ) -> Result<Conversation, LifecycleError> {
        let conversation = self.store.get_conversation(conversation_id).await?;

        if !conversation.is_owned_by(identity.user_id) && !identity.role.is_admin() {
            tracing::warn!(
                conversation_id = %conversation_id,
                user_id = %identity.user_id,
                role = %identity.role,
                "Close denied"
            );
            return Err(LifecycleError::Forbidden);
        }

        if !conversation.status.can_transition_to(ConversationStatus::Closed) {
            return Err(LifecycleError::InvalidTransition {
                from: conversation.status,
                to: ConversationStatus::Closed,
            });
        }

        self.transition(conversation_id, ConversationStatus::Closed, None, identity)
            .await
    }

    /// Current non-closed conversations, newest activity first
    pub async fn admin_snapshot(&self) -> Result<Vec<ConversationSummary>, LifecycleError> {
        let conversations = self.store.list_active_conversations().await?;
        Ok(conversations.iter().map(ConversationSummary::from).collect())
    }

    /// Queue the snapshot for one freshly joined admin dashboard and release
    /// it. The dashboard joined holding, so notifications broadcast while the
    /// store was being read are delivered after the snapshot, never before.
    /// The member is released even when the snapshot fails.
    pub async fn send_admin_snapshot(&self, session_id: Uuid) -> Result<(), LifecycleError> {
        let snapshot = match self.admin_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.registry
                    .release(ConversationId::ADMIN_BROADCAST, session_id, None);
                return Err(e);
            }
        };

        let payload = match encode(&snapshot) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(error = ?e, "Failed to encode admin snapshot");
                None
            }
        };
        self.registry
            .release(ConversationId::ADMIN_BROADCAST, session_id, payload);
        Ok(())
    }

    /// Announce the current state of a conversation to all admin dashboards
    pub fn notify_admins(&self, conversation: &Conversation) {
        match encode(&[ConversationSummary::from(conversation)]) {
            Ok(payload) => self.registry.broadcast(ConversationId::ADMIN_BROADCAST, payload),
            Err(e) => tracing::error!(
                error = ?e,
                conversation_id = %conversation.id,
                "Failed to encode admin notification"
            ),
        }
    }

    async fn open_if_pending(
        &self,
        conversation: &Conversation,
        identity: &SenderIdentity,
    ) -> Result<Option<Conversation>, LifecycleError> {
        if !identity.role.opens_conversations() || conversation.status != ConversationStatus::Pending {
            return Ok(None);
        }

        // System traffic opens the conversation without claiming it
        let assignee = identity.role.is_admin().then_some(identity.user_id);

        match self
            .transition(conversation.id, ConversationStatus::Open, assignee, identity)
            .await
        {
            Ok(opened) => Ok(Some(opened)),
            // Another staff member or a close got there first
            Err(LifecycleError::InvalidTransition { from, .. }) => {
                tracing::debug!(
                    conversation_id = %conversation.id,
                    status = %from,
                    "Conversation no longer pending, skipping open"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn transition(
        &self,
        conversation_id: ConversationId,
        to: ConversationStatus,
        assignee: Option<UserId>,
        identity: &SenderIdentity,
    ) -> Result<Conversation, LifecycleError> {
        let updated = self
            .store
            .update_conversation_status(conversation_id, to, assignee)
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            status = %updated.status,
            actor_id = %identity.user_id,
            actor_role = %identity.role,
            "Conversation status changed"
        );

        self.notify_admins(&updated);
        Ok(updated)
    }
}
