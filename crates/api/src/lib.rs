//! SupportLine API Library
//!
//! Real-time support chat: conversation rooms over WebSocket, the
//! conversation lifecycle, and start-or-reuse for new conversations.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use coordinator::ChatCreationCoordinator;
pub use error::{ApiError, ApiResult};
pub use lifecycle::ConversationLifecycle;
pub use state::AppState;
