//! # Live Relay
//!
//! Relays live-stream events to browsers. Each browser connection watches one
//! or more usernames; the relay keeps exactly one upstream connection per
//! watched username and fans its events out to every watcher.
//!
//! ## Modules
//!
//! - [`registry`]: Username → upstream session and watchers, plus event routing
//! - [`upstream`]: Connector seam and the webcast gateway connector
//! - [`websocket`]: Browser connections and wire messages
//! - [`api`]: HTTP server with Axum
//! - [`config`]: TOML/environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use live_relay::api::{serve, AppState};
//! use live_relay::config::Config;
//! use live_relay::upstream::GatewayConnector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let connector = Arc::new(GatewayConnector::new(config.gateway_config()));
//!     let state = AppState::new(config.api_config(), config.hub_config(), connector);
//!
//!     // Runs until Ctrl+C / SIGTERM
//!     serve(state).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod registry;
pub mod upstream;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig, ServerConfig, UpstreamConfig};

pub use registry::{RegistryError, SubscriptionRegistry, Username, WatchOutcome};

pub use upstream::{
    GatewayConfig, GatewayConnector, UpstreamConnector, UpstreamError, UpstreamEvent,
    UpstreamSession,
};

pub use websocket::{
    websocket_handler, ClientMessage, ConnectionHub, HubConfig, HubError, ServerMessage,
    StatusPayload,
};
