//! Shared hub state
//!
//! Everything a live socket needs, created once at startup and cloned into
//! each connection task.

use std::sync::Arc;

use supportline_shared::ConversationStore;

use crate::config::WsSettings;
use crate::lifecycle::ConversationLifecycle;

use super::room::RoomRegistry;

#[derive(Clone)]
pub struct HubState {
    pub store: Arc<dyn ConversationStore>,
    pub registry: RoomRegistry,
    pub lifecycle: ConversationLifecycle,
    pub settings: WsSettings,
}

impl HubState {
    /// Build the hub around `store`, starting a fresh room registry
    pub fn new(store: Arc<dyn ConversationStore>, settings: WsSettings) -> Self {
        let registry = RoomRegistry::spawn();
        let lifecycle = ConversationLifecycle::new(Arc::clone(&store), registry.clone());
        Self {
            store,
            registry,
            lifecycle,
            settings,
        }
    }
}
