//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,
    /// Application version
    pub version: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// When the server started
    pub started_at: DateTime<Utc>,
    /// Connected WebSocket clients
    pub connections: usize,
    /// Upstream sessions, pending or active
    pub sessions: usize,
}
