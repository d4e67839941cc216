//! Application state shared across handlers

use std::sync::Arc;

use sqlx::PgPool;

use supportline_shared::ConversationStore;

use crate::config::Config;
use crate::coordinator::ChatCreationCoordinator;
use crate::websocket::HubState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: HubState,
    pub coordinator: ChatCreationCoordinator,
    /// Present when running against Postgres
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ConversationStore>, pool: Option<PgPool>) -> Self {
        let hub = HubState::new(store.clone(), config.ws);
        let coordinator = ChatCreationCoordinator::new(store, hub.lifecycle.clone());
        Self {
            config: Arc::new(config),
            hub,
            coordinator,
            pool,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.hub.store
    }
}
