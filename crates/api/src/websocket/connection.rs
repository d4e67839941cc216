//! WebSocket connection
//!
//! Each socket runs one read loop and one write loop. They are joined by a
//! bounded outbound queue whose only sender is held by the room registry, so
//! a leave or an eviction closes the queue and ends the writer.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use supportline_shared::{ConversationId, Message, NewMessage, SenderIdentity, StoreError};

use super::events::{encode, ChatFrame, ErrorFrame, InboundFrame, Payload};
use super::room::Member;
use super::state::HubState;
use crate::config::WsSettings;

/// Sent to a sender whose message targets a closed conversation
pub const CLOSED_CONVERSATION_ERROR: &str = "conversation is closed";

/// What happened to one inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Persisted and broadcast to the room
    Delivered(Message),
    Oversized,
    Malformed,
    /// Admin dashboards only receive
    Ignored,
    ConversationClosed,
    PersistFailed,
}

/// An authenticated socket bound to one room
#[derive(Debug, Clone)]
pub struct Connection {
    pub session_id: Uuid,
    pub identity: SenderIdentity,
    pub conversation_id: ConversationId,
    pub connected_at: OffsetDateTime,
}

impl Connection {
    pub fn new(identity: SenderIdentity, conversation_id: ConversationId) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
            conversation_id,
            connected_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_admin_dashboard(&self) -> bool {
        self.conversation_id.is_admin_broadcast()
    }

    /// Run the connection until either loop finishes, then leave the room
    pub async fn serve(self, socket: WebSocket, hub: HubState) {
        let (sink, stream) = socket.split();
        let settings = hub.settings;
        let conversation_id = self.conversation_id;
        let session_id = self.session_id;

        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue);
        let member = Member::new(session_id, self.identity, outbound_tx);
        // Dashboards hold notifications until their snapshot is queued
        let member = if self.is_admin_dashboard() {
            member.holding()
        } else {
            member
        };
        hub.registry.join(conversation_id, member);
        self.after_join(&hub).await;

        tracing::info!(
            session_id = %session_id,
            user_id = %self.identity.user_id,
            role = %self.identity.role,
            conversation_id = %conversation_id,
            "WebSocket connection established"
        );

        let mut send_task = tokio::spawn(write_loop(sink, outbound_rx, settings));
        let reader = self.clone();
        let reader_hub = hub.clone();
        let mut recv_task = tokio::spawn(async move { reader.read_loop(stream, &reader_hub).await });

        tokio::select! {
            _ = &mut recv_task => {
                // Leaving closes the queue; the writer sends a close frame and stops
                hub.registry.leave(conversation_id, session_id);
                if tokio::time::timeout(settings.write_wait, &mut send_task).await.is_err() {
                    send_task.abort();
                }
            }
            _ = &mut send_task => {
                recv_task.abort();
                hub.registry.leave(conversation_id, session_id);
            }
        }

        let connected_secs = (OffsetDateTime::now_utc() - self.connected_at).whole_seconds();
        tracing::info!(
            session_id = %session_id,
            user_id = %self.identity.user_id,
            conversation_id = %conversation_id,
            connected_secs,
            "WebSocket connection closed"
        );
    }

    async fn after_join(&self, hub: &HubState) {
        if self.is_admin_dashboard() {
            if let Err(e) = hub.lifecycle.send_admin_snapshot(self.session_id).await {
                tracing::error!(error = %e, session_id = %self.session_id, "Failed to send admin snapshot");
            }
        } else if let Err(e) = hub
            .lifecycle
            .on_member_joined(self.conversation_id, &self.identity)
            .await
        {
            tracing::error!(
                error = %e,
                conversation_id = %self.conversation_id,
                "Failed to apply join to conversation lifecycle"
            );
        }
    }

    /// Read frames until the peer closes, errors, or misses the pong deadline
    pub async fn read_loop<S, E>(&self, mut stream: S, hub: &HubState)
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let pong_wait = hub.settings.pong_wait;
        let mut deadline = Instant::now() + pong_wait;

        loop {
            let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    tracing::info!(session_id = %self.session_id, "Pong deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!(session_id = %self.session_id, error = %e, "WebSocket read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => {
                    self.handle_text(&text, hub).await;
                }
                WsMessage::Binary(data) => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        bytes = data.len(),
                        "Dropping binary frame"
                    );
                }
                WsMessage::Pong(_) => deadline = Instant::now() + pong_wait,
                // axum answers pings itself
                WsMessage::Ping(_) => {}
                WsMessage::Close(_) => {
                    tracing::debug!(session_id = %self.session_id, "WebSocket close frame received");
                    break;
                }
            }
        }
    }

    /// Validate, persist and fan out one inbound text frame.
    /// Never fails the connection.
    pub async fn handle_text(&self, text: &str, hub: &HubState) -> InboundOutcome {
        if text.len() > hub.settings.max_frame_bytes {
            tracing::warn!(
                session_id = %self.session_id,
                size = text.len(),
                limit = hub.settings.max_frame_bytes,
                "Dropping oversized frame"
            );
            return InboundOutcome::Oversized;
        }

        if self.is_admin_dashboard() {
            return InboundOutcome::Ignored;
        }

        let Some(content) = InboundFrame::decode(text) else {
            tracing::debug!(session_id = %self.session_id, "Discarding malformed frame");
            return InboundOutcome::Malformed;
        };

        let conversation = match hub.store.get_conversation(self.conversation_id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    conversation_id = %self.conversation_id,
                    "Failed to load conversation for inbound message"
                );
                return InboundOutcome::PersistFailed;
            }
        };

        if hub.lifecycle.ensure_accepts_messages(&conversation).is_err() {
            self.reply_error(hub, CLOSED_CONVERSATION_ERROR);
            return InboundOutcome::ConversationClosed;
        }

        let new_message = NewMessage::from_sender(self.conversation_id, &self.identity, content);
        let message = match hub.store.create_message(new_message).await {
            Ok(message) => message,
            // Closed between the read above and the insert
            Err(StoreError::Closed(_)) => {
                self.reply_error(hub, CLOSED_CONVERSATION_ERROR);
                return InboundOutcome::ConversationClosed;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    conversation_id = %self.conversation_id,
                    sender_id = %self.identity.user_id,
                    "Failed to persist message"
                );
                return InboundOutcome::PersistFailed;
            }
        };

        if let Err(e) = hub.lifecycle.on_message(&conversation, &self.identity).await {
            tracing::warn!(
                error = %e,
                conversation_id = %self.conversation_id,
                "Failed to apply message to conversation lifecycle"
            );
        }

        match encode(&ChatFrame::from(&message)) {
            Ok(payload) => hub.registry.broadcast(self.conversation_id, payload),
            Err(e) => tracing::error!(error = ?e, "Failed to encode chat frame"),
        }

        InboundOutcome::Delivered(message)
    }

    fn reply_error(&self, hub: &HubState, error: &str) {
        match encode(&ErrorFrame::new(error)) {
            Ok(payload) => hub
                .registry
                .send_to(self.conversation_id, self.session_id, payload),
            Err(e) => tracing::error!(error = ?e, "Failed to encode error frame"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,
    #[error("socket write failed: {0}")]
    Socket(String),
}

/// Drain the outbound queue into the socket, pinging when idle.
/// A closed queue ends the loop with a close frame.
pub async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<Payload>, settings: WsSettings)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(payload) => {
                    let frame = WsMessage::Text(payload.to_string());
                    if let Err(e) = write_frame(&mut sink, frame, settings.write_wait).await {
                        tracing::debug!(error = %e, "Stopping writer");
                        return;
                    }
                    heartbeat.reset();
                }
                None => {
                    let _ = write_frame(&mut sink, WsMessage::Close(None), settings.write_wait).await;
                    return;
                }
            },
            _ = heartbeat.tick() => {
                if let Err(e) = write_frame(&mut sink, WsMessage::Ping(Vec::new()), settings.write_wait).await {
                    tracing::debug!(error = %e, "Heartbeat failed, stopping writer");
                    return;
                }
            }
        }
    }
}

async fn write_frame<S>(sink: &mut S, frame: WsMessage, wait: Duration) -> Result<(), WriteError>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Socket(e.to_string())),
        Err(_) => Err(WriteError::Timeout),
    }
}
