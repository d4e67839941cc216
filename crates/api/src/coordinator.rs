//! Start-or-reuse for support conversations
//!
//! A user may hold at most one non-closed conversation. The check and the
//! insert of the conversation plus its opening message happen in one store
//! transaction; a second attempt that loses the race gets the winner back as
//! [`StartOutcome::AlreadyOpen`].

use std::sync::Arc;

use supportline_shared::{
    ConversationStore, SenderIdentity, StartOutcome, StoreError, DEFAULT_CONVERSATION_LABEL,
};

use crate::lifecycle::ConversationLifecycle;

/// Upper bound for the opening message
pub const MAX_CONTENT_BYTES: usize = 50_000;
/// Upper bound for a conversation label
pub const MAX_LABEL_CHARS: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("Message content exceeds {} bytes", MAX_CONTENT_BYTES)]
    ContentTooLong,

    #[error("Label exceeds {} characters", MAX_LABEL_CHARS)]
    LabelTooLong,

    #[error("Conversation creation failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ChatCreationCoordinator {
    store: Arc<dyn ConversationStore>,
    lifecycle: ConversationLifecycle,
}

impl ChatCreationCoordinator {
    pub fn new(store: Arc<dyn ConversationStore>, lifecycle: ConversationLifecycle) -> Self {
        Self { store, lifecycle }
    }

    /// Start a conversation for `identity` with `content` as its first
    /// message, or return the conversation they already have open.
    ///
    /// A failed transaction leaves nothing behind and is safe to retry.
    pub async fn start(
        &self,
        identity: &SenderIdentity,
        content: &str,
        label: Option<&str>,
    ) -> Result<StartOutcome, CoordinatorError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoordinatorError::EmptyContent);
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(CoordinatorError::ContentTooLong);
        }

        let label = label
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_LABEL);
        if label.chars().count() > MAX_LABEL_CHARS {
            return Err(CoordinatorError::LabelTooLong);
        }

        let outcome = self
            .store
            .start_conversation(*identity, label, content)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = ?e,
                    user_id = %identity.user_id,
                    "Conversation creation transaction failed"
                );
                CoordinatorError::Store(e)
            })?;

        match &outcome {
            StartOutcome::Created { conversation, .. } => {
                tracing::info!(
                    conversation_id = %conversation.id,
                    user_id = %identity.user_id,
                    role = %identity.role,
                    "Conversation started"
                );
                self.lifecycle.notify_admins(conversation);
            }
            StartOutcome::AlreadyOpen(existing) => {
                tracing::debug!(
                    conversation_id = %existing.id,
                    user_id = %identity.user_id,
                    status = %existing.status,
                    "User already has an active conversation"
                );
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use supportline_shared::{
        Conversation, ConversationId, ConversationStatus, InMemoryConversationStore, Message,
        NewMessage, Role, UserId,
    };
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::websocket::events::ConversationSummary;
    use crate::websocket::room::{Member, RoomRegistry};

    fn coordinator_with(store: Arc<dyn ConversationStore>) -> (ChatCreationCoordinator, RoomRegistry) {
        let registry = RoomRegistry::spawn();
        let lifecycle = ConversationLifecycle::new(store.clone(), registry.clone());
        (ChatCreationCoordinator::new(store, lifecycle), registry)
    }

    fn user() -> SenderIdentity {
        SenderIdentity::new(UserId::new(), Role::User)
    }

    #[tokio::test]
    async fn test_start_creates_pending_conversation() {
        let store = Arc::new(InMemoryConversationStore::new());
        let (coordinator, _registry) = coordinator_with(store.clone());
        let identity = user();

        let outcome = coordinator.start(&identity, "hello", None).await.unwrap();
        let StartOutcome::Created { conversation, message } = outcome else {
            panic!("expected a new conversation");
        };
        assert_eq!(conversation.status, ConversationStatus::Pending);
        assert_eq!(conversation.owner_id, identity.user_id);
        assert_eq!(conversation.label, DEFAULT_CONVERSATION_LABEL);
        assert_eq!(message.content, "hello");
        assert_eq!(message.sender_id, identity.user_id);
    }

    #[tokio::test]
    async fn test_second_start_reuses_existing() {
        let store = Arc::new(InMemoryConversationStore::new());
        let (coordinator, _registry) = coordinator_with(store.clone());
        let identity = user();

        let first = coordinator.start(&identity, "hello", Some("Billing")).await.unwrap();
        let StartOutcome::Created { conversation, .. } = first else {
            panic!("expected a new conversation");
        };
        assert_eq!(conversation.label, "Billing");

        let second = coordinator.start(&identity, "anyone there?", None).await.unwrap();
        assert_eq!(second, StartOutcome::AlreadyOpen(conversation));
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_have_one_winner() {
        let store = Arc::new(InMemoryConversationStore::new());
        let (coordinator, _registry) = coordinator_with(store.clone());
        let identity = user();

        let (a, b) = tokio::join!(
            coordinator.start(&identity, "first", None),
            coordinator.start(&identity, "second", None)
        );

        let (winner, loser) = match (a.unwrap(), b.unwrap()) {
            (StartOutcome::Created { conversation, .. }, StartOutcome::AlreadyOpen(existing))
            | (StartOutcome::AlreadyOpen(existing), StartOutcome::Created { conversation, .. }) => {
                (conversation, existing)
            }
            other => panic!("expected exactly one creation, got {:?}", other),
        };
        assert_eq!(winner.id, loser.id);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_validation() {
        let store = Arc::new(InMemoryConversationStore::new());
        let (coordinator, _registry) = coordinator_with(store.clone());
        let identity = user();

        assert!(matches!(
            coordinator.start(&identity, "   ", None).await,
            Err(CoordinatorError::EmptyContent)
        ));
        assert!(matches!(
            coordinator
                .start(&identity, &"x".repeat(MAX_CONTENT_BYTES + 1), None)
                .await,
            Err(CoordinatorError::ContentTooLong)
        ));
        assert!(matches!(
            coordinator
                .start(&identity, "hi", Some(&"l".repeat(MAX_LABEL_CHARS + 1)))
                .await,
            Err(CoordinatorError::LabelTooLong)
        ));
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_creation_is_announced_to_admins() {
        let store = Arc::new(InMemoryConversationStore::new());
        let (coordinator, registry) = coordinator_with(store);
        let (tx, mut rx) = mpsc::channel(4);
        registry.join(
            ConversationId::ADMIN_BROADCAST,
            Member::new(Uuid::new_v4(), SenderIdentity::new(UserId::new(), Role::Admin), tx),
        );

        let StartOutcome::Created { conversation, .. } =
            coordinator.start(&user(), "hello", None).await.unwrap()
        else {
            panic!("expected a new conversation");
        };

        let frame: Vec<ConversationSummary> = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].conversation_id, conversation.id);
        assert_eq!(frame[0].status, ConversationStatus::Pending);
    }

    #[tokio::test]
    async fn test_opening_message_carries_staff_flags() {
        for (role, is_admin, is_system) in [
            (Role::Admin, true, false),
            (Role::Superadmin, true, false),
            (Role::System, false, true),
        ] {
            let store = Arc::new(InMemoryConversationStore::new());
            let (coordinator, _registry) = coordinator_with(store.clone());
            let identity = SenderIdentity::new(UserId::new(), role);

            let StartOutcome::Created { conversation, message } =
                coordinator.start(&identity, "escalated from phone", None).await.unwrap()
            else {
                panic!("expected a new conversation for {}", role);
            };
            assert_eq!(message.sender_id, identity.user_id);
            assert_eq!(message.is_admin, is_admin, "is_admin for {}", role);
            assert_eq!(message.is_system, is_system, "is_system for {}", role);

            let history = store.list_messages(conversation.id, 10, 0).await.unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].is_admin, is_admin);
            assert_eq!(history[0].is_system, is_system);
        }
    }

    /// Store whose transaction always fails
    struct BrokenStore;

    #[async_trait]
    impl ConversationStore for BrokenStore {
        async fn create_message(&self, _: NewMessage) -> Result<Message, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn update_conversation_status(
            &self,
            id: ConversationId,
            _: ConversationStatus,
            _: Option<UserId>,
        ) -> Result<Conversation, StoreError> {
            Err(StoreError::NotFound(id))
        }
        async fn find_open_conversation_by_owner(
            &self,
            _: UserId,
        ) -> Result<Option<Conversation>, StoreError> {
            Ok(None)
        }
        async fn start_conversation(
            &self,
            _: SenderIdentity,
            _: &str,
            _: &str,
        ) -> Result<StartOutcome, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn list_active_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
            Ok(Vec::new())
        }
        async fn list_messages(
            &self,
            _: ConversationId,
            _: i64,
            _: i64,
        ) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_transaction_failure_is_generic() {
        let (coordinator, _registry) = coordinator_with(Arc::new(BrokenStore));
        let err = coordinator.start(&user(), "hello", None).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Store(StoreError::Database(_))));
    }
}
