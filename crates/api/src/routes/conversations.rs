//! Support conversation routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use supportline_shared::{Conversation, ConversationId, Message, SenderIdentity, StartOutcome};

use crate::{
    error::{ApiError, ApiResult},
    identity::Caller,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub content: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartConversationResponse {
    Created {
        conversation: Conversation,
        message: Message,
    },
    AlreadyOpen {
        conversation: Conversation,
    },
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a conversation or get back the caller's active one
pub async fn start_conversation(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Json(req): Json<StartConversationRequest>,
) -> ApiResult<(StatusCode, Json<StartConversationResponse>)> {
    let outcome = state
        .coordinator
        .start(&identity, &req.content, req.label.as_deref())
        .await?;

    Ok(match outcome {
        StartOutcome::Created {
            conversation,
            message,
        } => (
            StatusCode::CREATED,
            Json(StartConversationResponse::Created {
                conversation,
                message,
            }),
        ),
        StartOutcome::AlreadyOpen(conversation) => (
            StatusCode::OK,
            Json(StartConversationResponse::AlreadyOpen { conversation }),
        ),
    })
}

/// Get one conversation
pub async fn get_conversation(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = visible_conversation(&state, &identity, conversation_id.into()).await?;
    Ok(Json(conversation))
}

/// Message history in send order
pub async fn list_messages(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let conversation = visible_conversation(&state, &identity, conversation_id.into()).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);
    let messages = state
        .store()
        .list_messages(conversation.id, limit, offset)
        .await?;

    Ok(Json(messages))
}

/// Close a conversation (owner or admin)
pub async fn close_conversation(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .hub
        .lifecycle
        .close(conversation_id.into(), &identity)
        .await?;
    Ok(Json(conversation))
}

/// Owners see their own conversations; staff see all of them
async fn visible_conversation(
    state: &AppState,
    identity: &SenderIdentity,
    conversation_id: ConversationId,
) -> ApiResult<Conversation> {
    let conversation = state.store().get_conversation(conversation_id).await?;
    if !conversation.is_owned_by(identity.user_id) && !identity.role.opens_conversations() {
        return Err(ApiError::NotFound);
    }
    Ok(conversation)
}
