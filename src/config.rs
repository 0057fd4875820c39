//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::ApiConfig;
use crate::upstream::GatewayConfig;
use crate::websocket::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin; `*` allows any origin
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,

    /// Directory served for the browser front-end
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_allowed_origin() -> String {
    "*".to_string()
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_max_connections() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origin: default_allowed_origin(),
            static_dir: default_static_dir(),
            max_connections: default_max_connections(),
        }
    }
}

/// Upstream gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Gateway URL template containing `{username}`
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Connect timeout; unset means wait as long as the gateway takes
    pub connect_timeout_secs: Option<u64>,
}

fn default_upstream_url() -> String {
    GatewayConfig::default().url
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            connect_timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        format!("live_relay={level},tower_http={level}", level = self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("live-relay").join("config.toml")),
            Some(PathBuf::from("/etc/live-relay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first existing file in `paths` that parses, else environment only
    pub fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
        if let Some(origin) = var("ALLOWED_ORIGIN") {
            self.server.allowed_origin = origin;
        }
        if let Some(host) = var("LIVE_RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(dir) = var("LIVE_RELAY_STATIC_DIR") {
            self.server.static_dir = dir;
        }

        // Upstream overrides
        if let Some(url) = var("LIVE_RELAY_UPSTREAM_URL") {
            self.upstream.url = url;
        }

        // Logging overrides
        if let Some(level) = var("LIVE_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("LIVE_RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// API server settings
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            allowed_origin: self.server.allowed_origin.clone(),
            static_dir: PathBuf::from(&self.server.static_dir),
        }
    }

    /// Connection hub settings
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.server.max_connections,
        }
    }

    /// Gateway connector settings
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.upstream.url.clone(),
            connect_timeout_secs: self.upstream.connect_timeout_secs,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Live Relay Configuration
#
# Environment variables override these settings:
# - PORT
# - ALLOWED_ORIGIN
# - LIVE_RELAY_HOST
# - LIVE_RELAY_STATIC_DIR
# - LIVE_RELAY_UPSTREAM_URL
# - LIVE_RELAY_LOG_LEVEL
# - LIVE_RELAY_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port
port = 3000

# Allowed CORS origin ("*" allows any origin)
allowed_origin = "*"

# Directory with the browser front-end
static_dir = "public"

# Maximum concurrent WebSocket clients
max_connections = 1000

[upstream]
# Webcast gateway URL; {username} is replaced with the watched username
url = "ws://127.0.0.1:8081/webcast/{username}"

# Optional connect timeout in seconds
# connect_timeout_secs = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
