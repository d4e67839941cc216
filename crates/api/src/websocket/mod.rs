//! WebSocket support for real-time support chat
//!
//! # Architecture
//!
//! - **Connection**: One authenticated socket with its read and write loops
//! - **Room**: Registry actor that owns conversation rooms and fans frames out
//! - **State**: Store, registry and lifecycle shared by every connection
//! - **Handler**: Axum upgrade handlers for conversation and admin sockets
//! - **Events**: Wire frames for client/server communication
//!
//! The admin dashboard is the room keyed by the nil conversation id.

pub mod connection;
pub mod events;
pub mod handler;
pub mod room;
pub mod state;

pub use handler::{ws_admin_handler, ws_conversation_handler};
pub use state::HubState;
