//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::RoomRegistry;
use crate::store::StatsStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
    pub stats: StatsStore,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let stats = StatsStore::from_database_url(config.database_url.as_deref());
        let rooms = Arc::new(RoomRegistry::new(config.clone()));

        Self {
            config,
            rooms,
            stats,
        }
    }
}
