//! Domain types shared between the store and the real-time hub

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Conversation ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    /// Reserved room id that every admin dashboard joins.
    /// Never assigned to a persisted conversation.
    pub const ADMIN_BROADCAST: Self = Self(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_admin_broadcast(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConversationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Message ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Role of the party behind a connection or request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Guest,
    Admin,
    Superadmin,
    System,
}

impl Role {
    /// Human support staff. Drives the `is_admin` message flag and may close
    /// any conversation.
    pub fn is_admin(&self) -> bool {
        match self {
            Self::Admin | Self::Superadmin => true,
            Self::User | Self::Guest | Self::System => false,
        }
    }

    /// Platform-generated traffic. Drives the `is_system` message flag.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Roles whose presence or first message moves a pending conversation to open
    pub fn opens_conversations(&self) -> bool {
        match self {
            Self::Admin | Self::Superadmin | Self::System => true,
            Self::User | Self::Guest => false,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Guest => write!(f, "guest"),
            Self::Admin => write!(f, "admin"),
            Self::Superadmin => write!(f, "superadmin"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            "admin" => Ok(Self::Admin),
            "superadmin" => Ok(Self::Superadmin),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Open,
    Closed,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ConversationStatus {
    /// `Closed` has no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Open) | (Self::Pending, Self::Closed) | (Self::Open, Self::Closed)
        )
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid conversation status: {}", s)),
        }
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Identity of a caller, already authenticated upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub user_id: UserId,
    pub role: Role,
}

impl SenderIdentity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

// =============================================================================
// Models
// =============================================================================

/// Label given to conversations started without one
pub const DEFAULT_CONVERSATION_LABEL: &str = "New Chat";

/// Conversation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: UserId,
    pub assigned_admin_id: Option<UserId>,
    pub label: String,
    pub status: ConversationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

/// Message model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub is_system: bool,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Message fields supplied by the writer; id and timestamp are assigned by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub is_system: bool,
    pub is_admin: bool,
}

impl NewMessage {
    /// Build a message whose flags agree with the sender's role
    pub fn from_sender(
        conversation_id: ConversationId,
        sender: &SenderIdentity,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            sender_id: sender.user_id,
            content: content.into(),
            is_system: sender.role.is_system(),
            is_admin: sender.role.is_admin(),
        }
    }
}

/// Result of a "start or reuse" attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A new pending conversation was committed together with its opening message
    Created {
        conversation: Conversation,
        message: Message,
    },
    /// The owner already has a non-closed conversation; nothing was written
    AlreadyOpen(Conversation),
}
