//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{LobbyRegistry, SimulationConfig};
use crate::http::auth::AuthService;
use crate::matchmaking::MatchmakingService;
use crate::store::PlayerStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: PlayerStore,
    pub auth: Arc<AuthService>,
    pub matchmaking: Arc<MatchmakingService>,
    pub lobby_registry: Arc<LobbyRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = PlayerStore::from_config(&config);
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: PlayerStore) -> Self {
        let config = Arc::new(config);

        let sim_config = SimulationConfig {
            tick_rate: config.tick_rate,
            ..SimulationConfig::default()
        };

        let lobby_registry = Arc::new(LobbyRegistry::new());
        let auth = Arc::new(AuthService::new(store.clone()));
        let matchmaking = Arc::new(MatchmakingService::new(
            lobby_registry.clone(),
            store.clone(),
            sim_config,
            config.matchmaking_interval,
        ));

        Self {
            config,
            store,
            auth,
            matchmaking,
            lobby_registry,
        }
    }
}
