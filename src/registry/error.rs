//! Registry error types

use thiserror::Error;

/// Errors returned by [`SubscriptionRegistry::watch`](super::SubscriptionRegistry::watch)
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Username was empty after normalization
    #[error("username required")]
    InvalidInput,

    /// Upstream connection attempt failed
    #[error("failed to connect to {username}: {reason}")]
    ConnectFailure { username: String, reason: String },

    /// Every watcher left before the upstream connection completed
    #[error("no watchers left for {0}")]
    Abandoned(String),
}

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
