//! WebSocket upgrade handlers for Axum
//!
//! Access is checked before the upgrade so refusals surface as ordinary HTTP
//! errors instead of an immediately closed socket.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use uuid::Uuid;

use supportline_shared::ConversationId;

use crate::error::{ApiError, ApiResult};
use crate::identity::Caller;
use crate::state::AppState;

use super::connection::Connection;

/// Join the room of one conversation
pub async fn ws_conversation_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Response> {
    let conversation_id = ConversationId::from(conversation_id);
    if conversation_id.is_admin_broadcast() {
        return Err(ApiError::BadRequest(
            "Use the admin endpoint for the dashboard feed".to_string(),
        ));
    }

    let conversation = state.store().get_conversation(conversation_id).await?;

    if !conversation.is_owned_by(identity.user_id) && !identity.role.opens_conversations() {
        tracing::warn!(
            user_id = %identity.user_id,
            role = %identity.role,
            conversation_id = %conversation_id,
            "WebSocket join denied"
        );
        return Err(ApiError::Forbidden);
    }

    state.hub.lifecycle.ensure_accepts_messages(&conversation)?;

    tracing::info!(
        user_id = %identity.user_id,
        conversation_id = %conversation_id,
        "WebSocket connection upgrade requested"
    );

    let hub = state.hub.clone();
    let connection = Connection::new(identity, conversation_id);
    Ok(ws
        .max_message_size(hub.settings.max_message_bytes())
        .on_upgrade(move |socket| connection.serve(socket, hub)))
}

/// Join the admin dashboard feed
pub async fn ws_admin_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> ApiResult<Response> {
    if !identity.role.is_admin() {
        return Err(ApiError::Forbidden);
    }

    tracing::info!(user_id = %identity.user_id, "Admin dashboard upgrade requested");

    let hub = state.hub.clone();
    let connection = Connection::new(identity, ConversationId::ADMIN_BROADCAST);
    Ok(ws
        .max_message_size(hub.settings.max_message_bytes())
        .on_upgrade(move |socket| connection.serve(socket, hub)))
}
