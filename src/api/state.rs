//! Application State
//!
//! Shared state accessible by all handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::registry::SubscriptionRegistry;
use crate::upstream::UpstreamConnector;
use crate::websocket::{ConnectionHub, HubConfig};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Wall-clock start time reported by /health
    pub started_at: DateTime<Utc>,
    /// WebSocket connection hub
    pub hub: Arc<ConnectionHub>,
    /// Username → upstream session registry
    pub registry: Arc<SubscriptionRegistry>,
}

impl AppState {
    /// Create AppState around an upstream connector
    pub fn new(
        config: ApiConfig,
        hub_config: HubConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(hub_config));
        let registry = Arc::new(SubscriptionRegistry::new(connector, Arc::clone(&hub)));

        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            started_at: Utc::now(),
            hub,
            registry,
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origin; `*` allows any origin
    pub allowed_origin: String,
    /// Directory with static front-end assets
    pub static_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origin: "*".to_string(),
            static_dir: PathBuf::from("public"),
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
