//! SupportLine shared types and persistence
//!
//! Domain types, the conversation store abstraction and its PostgreSQL and
//! in-memory implementations.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use store::{ConversationStore, InMemoryConversationStore, PgConversationStore};
pub use types::*;
