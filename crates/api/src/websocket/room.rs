//! Conversation room registry
//!
//! One actor task owns every room's membership. Handles are cheap clones that
//! forward commands over an unbounded channel, so callers never wait on the
//! registry and the map is never touched from two tasks at once.
//!
//! The registry holds the only sender of each member's outbound queue.
//! Removing a member (leave or eviction) drops that sender, which closes the
//! queue and lets the member's writer loop finish with a close frame.
//!
//! A member may join holding: frames offered to it are parked in the
//! registry until `release`, which delivers a lead frame ahead of them. This
//! lets a late reader of the store (the admin snapshot) go out before any
//! notification broadcast after it joined.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use supportline_shared::{ConversationId, SenderIdentity};

use super::events::Payload;

/// A connection as seen by the registry
#[derive(Debug)]
pub struct Member {
    pub session_id: Uuid,
    pub identity: SenderIdentity,
    outbound: mpsc::Sender<Payload>,
    held: Option<Vec<Payload>>,
}

impl Member {
    pub fn new(session_id: Uuid, identity: SenderIdentity, outbound: mpsc::Sender<Payload>) -> Self {
        Self {
            session_id,
            identity,
            outbound,
            held: None,
        }
    }

    /// Park frames in the registry until this member is released
    pub fn holding(mut self) -> Self {
        self.held = Some(Vec::new());
        self
    }
}

#[derive(Debug)]
enum Command {
    Join {
        conversation_id: ConversationId,
        member: Member,
    },
    Leave {
        conversation_id: ConversationId,
        session_id: Uuid,
    },
    Broadcast {
        conversation_id: ConversationId,
        payload: Payload,
    },
    SendTo {
        conversation_id: ConversationId,
        session_id: Uuid,
        payload: Payload,
    },
    Release {
        conversation_id: ConversationId,
        session_id: Uuid,
        first: Option<Payload>,
    },
    RoomSize {
        conversation_id: ConversationId,
        reply: oneshot::Sender<usize>,
    },
    RoomCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the room registry actor
#[derive(Clone, Debug)]
pub struct RoomRegistry {
    commands: mpsc::UnboundedSender<Command>,
}

impl RoomRegistry {
    /// Start the registry actor on the current runtime.
    /// The actor stops once every handle has been dropped.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { commands }
    }

    /// Add a member to a room, creating the room if needed
    pub fn join(&self, conversation_id: ConversationId, member: Member) {
        self.dispatch(Command::Join {
            conversation_id,
            member,
        });
    }

    /// Remove a member and close its outbound queue
    pub fn leave(&self, conversation_id: ConversationId, session_id: Uuid) {
        self.dispatch(Command::Leave {
            conversation_id,
            session_id,
        });
    }

    /// Queue `payload` for every member of the room without waiting.
    /// Members whose queue is full are evicted.
    pub fn broadcast(&self, conversation_id: ConversationId, payload: Payload) {
        self.dispatch(Command::Broadcast {
            conversation_id,
            payload,
        });
    }

    /// Queue `payload` for a single member, with the same eviction rule as broadcast
    pub fn send_to(&self, conversation_id: ConversationId, session_id: Uuid, payload: Payload) {
        self.dispatch(Command::SendTo {
            conversation_id,
            session_id,
            payload,
        });
    }

    /// Deliver `first` to a member, then whatever was parked while it was
    /// holding. For a member that is not holding this is `send_to`.
    pub fn release(&self, conversation_id: ConversationId, session_id: Uuid, first: Option<Payload>) {
        self.dispatch(Command::Release {
            conversation_id,
            session_id,
            first,
        });
    }

    /// Number of members in a room (0 if the room does not exist)
    pub async fn room_size(&self, conversation_id: ConversationId) -> usize {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::RoomSize {
            conversation_id,
            reply,
        });
        rx.await.unwrap_or(0)
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::RoomCount { reply });
        rx.await.unwrap_or(0)
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!("Room registry actor is not running; command dropped");
        }
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut rooms = Rooms::default();
    while let Some(command) = commands.recv().await {
        rooms.apply(command);
    }
    tracing::debug!("Room registry stopped");
}

/// Outcome of a single fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Delivery {
    delivered: usize,
    evicted: usize,
}

/// Membership state; only ever owned by the actor task
#[derive(Default)]
struct Rooms {
    rooms: HashMap<ConversationId, HashMap<Uuid, Member>>,
}

impl Rooms {
    fn apply(&mut self, command: Command) {
        match command {
            Command::Join {
                conversation_id,
                member,
            } => self.join(conversation_id, member),
            Command::Leave {
                conversation_id,
                session_id,
            } => self.leave(conversation_id, session_id),
            Command::Broadcast {
                conversation_id,
                payload,
            } => {
                self.broadcast(conversation_id, &payload);
            }
            Command::SendTo {
                conversation_id,
                session_id,
                payload,
            } => self.send_to(conversation_id, session_id, payload),
            Command::Release {
                conversation_id,
                session_id,
                first,
            } => self.release(conversation_id, session_id, first),
            Command::RoomSize {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.room_size(conversation_id));
            }
            Command::RoomCount { reply } => {
                let _ = reply.send(self.rooms.len());
            }
        }
    }

    fn join(&mut self, conversation_id: ConversationId, member: Member) {
        let room = self.rooms.entry(conversation_id).or_default();
        let session_id = member.session_id;
        room.entry(session_id).or_insert(member);

        tracing::debug!(
            conversation_id = %conversation_id,
            session_id = %session_id,
            room_size = room.len(),
            "Connection joined room"
        );
    }

    fn leave(&mut self, conversation_id: ConversationId, session_id: Uuid) {
        let Some(room) = self.rooms.get_mut(&conversation_id) else {
            return;
        };
        if room.remove(&session_id).is_none() {
            return;
        }

        if room.is_empty() {
            self.rooms.remove(&conversation_id);
            tracing::debug!(conversation_id = %conversation_id, "Removed empty room");
        } else {
            tracing::debug!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                room_size = room.len(),
                "Connection left room"
            );
        }
    }

    fn broadcast(&mut self, conversation_id: ConversationId, payload: &Payload) -> Delivery {
        let Some(room) = self.rooms.get_mut(&conversation_id) else {
            tracing::trace!(conversation_id = %conversation_id, "Broadcast to empty room");
            return Delivery::default();
        };

        let mut delivery = Delivery::default();
        room.retain(|session_id, member| {
            if offer(conversation_id, *session_id, member, payload.clone()) {
                delivery.delivered += 1;
                true
            } else {
                delivery.evicted += 1;
                false
            }
        });

        if room.is_empty() {
            self.rooms.remove(&conversation_id);
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            recipients = delivery.delivered,
            evicted = delivery.evicted,
            "Broadcast to room"
        );
        delivery
    }

    fn send_to(&mut self, conversation_id: ConversationId, session_id: Uuid, payload: Payload) {
        let Some(room) = self.rooms.get_mut(&conversation_id) else {
            return;
        };
        let Some(member) = room.get_mut(&session_id) else {
            return;
        };

        if !offer(conversation_id, session_id, member, payload) {
            self.evict(conversation_id, session_id);
        }
    }

    fn release(&mut self, conversation_id: ConversationId, session_id: Uuid, first: Option<Payload>) {
        let Some(member) = self
            .rooms
            .get_mut(&conversation_id)
            .and_then(|room| room.get_mut(&session_id))
        else {
            return;
        };

        let held = member.held.take().unwrap_or_default();
        let parked = held.len();
        let delivered = first
            .into_iter()
            .chain(held)
            .all(|payload| offer(conversation_id, session_id, member, payload));

        if delivered {
            tracing::trace!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                parked,
                "Released held connection"
            );
        } else {
            self.evict(conversation_id, session_id);
        }
    }

    fn evict(&mut self, conversation_id: ConversationId, session_id: Uuid) {
        let Some(room) = self.rooms.get_mut(&conversation_id) else {
            return;
        };
        room.remove(&session_id);
        if room.is_empty() {
            self.rooms.remove(&conversation_id);
        }
    }

    fn room_size(&self, conversation_id: ConversationId) -> usize {
        self.rooms.get(&conversation_id).map(|r| r.len()).unwrap_or(0)
    }
}

/// Non-blocking enqueue. `false` means the member must be evicted.
fn offer(conversation_id: ConversationId, session_id: Uuid, member: &mut Member, payload: Payload) -> bool {
    if let Some(held) = member.held.as_mut() {
        // Parking is bounded by the same capacity as the queue itself
        if held.len() < member.outbound.max_capacity() {
            held.push(payload);
            return true;
        }
        tracing::warn!(
            conversation_id = %conversation_id,
            session_id = %session_id,
            user_id = %member.identity.user_id,
            "Held frames exceeded queue capacity, evicting connection"
        );
        return false;
    }

    match member.outbound.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                user_id = %member.identity.user_id,
                "Outbound queue full, evicting slow connection"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                "Outbound queue already closed, removing connection"
            );
            false
        }
    }
}
