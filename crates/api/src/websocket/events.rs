//! WebSocket wire frames
//!
//! All frames are UTF-8 JSON text frames. Clients only ever send
//! [`InboundFrame`]; the server sends [`ChatFrame`] to conversation rooms,
//! arrays of [`ConversationSummary`] to the admin room, and [`ErrorFrame`] to
//! a single sender.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use supportline_shared::{Conversation, ConversationId, ConversationStatus, Message, UserId};

/// Encoded frame as queued for a connection's writer.
/// Shared between all recipients of one broadcast.
pub type Payload = Arc<str>;

/// Client → server chat message
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub content: String,
}

impl InboundFrame {
    /// Decode and trim an inbound text frame. `None` for anything that is not
    /// a JSON object with non-blank string `content`.
    pub fn decode(text: &str) -> Option<String> {
        let frame: InboundFrame = serde_json::from_str(text).ok()?;
        let content = frame.content.trim();
        if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        }
    }
}

/// Server → room chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub content: String,
    pub sender_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_system: bool,
}

impl From<&Message> for ChatFrame {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            sender_id: message.sender_id,
            created_at: message.created_at,
            is_system: message.is_system,
        }
    }
}

/// One entry of an admin-room frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub owner_id: UserId,
    pub status: ConversationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.id,
            owner_id: conversation.owner_id,
            status: conversation.status,
            updated_at: conversation.updated_at,
        }
    }
}

/// Server → single sender rejection notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Serialize a frame once for fan-out
pub fn encode<T: Serialize + ?Sized>(frame: &T) -> Result<Payload, serde_json::Error> {
    serde_json::to_string(frame).map(Payload::from)
}
