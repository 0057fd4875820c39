//! Upstream Live-Event Connections
//!
//! The relay never speaks the streaming service's protocol itself. It opens
//! sessions through an [`UpstreamConnector`] and receives decoded events on a
//! channel, one channel per session.
//!
//! ## Architecture
//!
//! - **UpstreamConnector**: Opens a session for a username
//! - **UpstreamSession**: Owned handle to an open session; consumed on disconnect
//! - **GatewayConnector**: Production connector backed by a webcast event gateway
//!
//! ## Event Flow
//!
//! ```text
//! gateway frame → UpstreamEvent → mpsc channel → EventRouter → subscribers
//! ```

mod gateway;
#[cfg(test)]
pub(crate) mod testing;

pub use gateway::{GatewayConfig, GatewayConnector};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sender half handed to a connector; the router owns the receiver
pub type EventSender = mpsc::UnboundedSender<UpstreamEvent>;

/// A decoded event from an upstream session
///
/// Payloads are passed through to clients unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Upstream connection established
    Connected(Value),
    /// Upstream connection lost
    Disconnected(Value),
    /// Chat message
    Chat(Value),
    /// Gift sent to the streamer
    Gift(Value),
    /// Like burst
    Like(Value),
    /// Viewer count update
    Viewer(Value),
    /// Runtime error reported by the upstream session
    Error(String),
}

impl UpstreamEvent {
    /// Build an event from a gateway event name and payload
    ///
    /// Returns `None` for event kinds the relay does not forward.
    pub fn from_parts(kind: &str, data: Value) -> Option<Self> {
        let event = match kind {
            "connected" => Self::Connected(data),
            "disconnected" => Self::Disconnected(data),
            "chat" => Self::Chat(data),
            "gift" => Self::Gift(data),
            "like" => Self::Like(data),
            "viewer" => Self::Viewer(data),
            "error" => Self::Error(match data {
                Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => return None,
        };
        Some(event)
    }

    /// Event kind name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Chat(_) => "chat",
            Self::Gift(_) => "gift",
            Self::Like(_) => "like",
            Self::Viewer(_) => "viewer",
            Self::Error(_) => "error",
        }
    }
}

/// Opens upstream sessions
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connect to the live stream of `username`
    ///
    /// Events are sent on `events` for as long as the session lives, including
    /// events emitted while the connect is still in progress.
    async fn connect(
        &self,
        username: &str,
        events: EventSender,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError>;
}

/// An open upstream session
pub trait UpstreamSession: Send + Sync {
    /// Close the upstream connection
    fn disconnect(self: Box<Self>);
}

/// Errors that can occur while opening an upstream session
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection timed out after {0} seconds")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for UpstreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => UpstreamError::Closed,
            Error::Protocol(e) => UpstreamError::Protocol(e.to_string()),
            other => UpstreamError::Connect(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_known_kinds() {
        let data = json!({"uniqueId": "viewer1", "comment": "hi"});
        assert_eq!(
            UpstreamEvent::from_parts("chat", data.clone()),
            Some(UpstreamEvent::Chat(data))
        );
        assert_eq!(
            UpstreamEvent::from_parts("viewer", json!({"viewerCount": 42})),
            Some(UpstreamEvent::Viewer(json!({"viewerCount": 42})))
        );
    }

    #[test]
    fn test_from_parts_error_payload() {
        assert_eq!(
            UpstreamEvent::from_parts("error", json!("stream ended")),
            Some(UpstreamEvent::Error("stream ended".to_string()))
        );
        assert_eq!(
            UpstreamEvent::from_parts("error", json!({"code": 4})),
            Some(UpstreamEvent::Error(r#"{"code":4}"#.to_string()))
        );
    }

    #[test]
    fn test_from_parts_unknown_kind() {
        assert_eq!(UpstreamEvent::from_parts("share", json!({})), None);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            UpstreamError::Timeout(10).to_string(),
            "Connection timed out after 10 seconds"
        );
    }
}
