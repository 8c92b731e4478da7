//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::game::GameCoordinator;

/// Default keepalive interval on live connections.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Session coordinator.
    pub games: Arc<GameCoordinator>,
    /// Keepalive interval on live connections.
    pub ping_interval: Duration,
    /// Origins allowed by CORS. Empty means local development origins.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    /// Create application state.
    pub fn new(games: Arc<GameCoordinator>) -> Self {
        Self {
            games,
            ping_interval: DEFAULT_PING_INTERVAL,
            allowed_origins: Vec::new(),
        }
    }

    /// Set the live keepalive interval. Zero is raised to one second.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }
}
