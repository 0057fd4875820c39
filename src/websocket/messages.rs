//! WebSocket Message Types
//!
//! Defines all message types for WebSocket communication between
//! browser clients and the relay.
//!
//! Every frame is a JSON object naming the event and carrying its payload:
//!
//! ```json
//! {"event": "watch", "data": "@alice"}
//! {"event": "chat", "data": {"uniqueId": "viewer1", "comment": "hello"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    try_from = "ClientFrame"
)]
pub enum ClientMessage {
    /// Start watching a username's live stream (`null` or missing counts as empty)
    Watch(Option<String>),
}

/// Inbound frame before the event name is checked
#[derive(Deserialize)]
pub struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Option<String>,
}

impl TryFrom<ClientFrame> for ClientMessage {
    type Error = String;

    fn try_from(frame: ClientFrame) -> Result<Self, Self::Error> {
        match frame.event.as_str() {
            "watch" => Ok(ClientMessage::Watch(frame.data)),
            other => Err(format!("unknown event `{}`", other)),
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection and watch status
    Status(StatusPayload),
    /// Chat message, passed through from upstream
    Chat(Value),
    /// Gift, passed through from upstream
    Gift(Value),
    /// Like, passed through from upstream
    Like(Value),
    /// Viewer count update, passed through from upstream
    Viewer(Value),
    /// Error addressed to a single client
    Error(String),
}

/// Body of a `status` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub ok: bool,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl StatusPayload {
    /// Successful status
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            ok: true,
            msg: msg.into(),
            data: None,
            err: None,
        }
    }

    /// Failed status
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            ..Self::ok(msg)
        }
    }

    /// Attach an upstream payload
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an error description
    pub fn err(mut self, err: impl Into<String>) -> Self {
        self.err = Some(err.into());
        self
    }
}

impl From<StatusPayload> for ServerMessage {
    fn from(status: StatusPayload) -> Self {
        ServerMessage::Status(status)
    }
}

impl ServerMessage {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Status(_) => "status",
            ServerMessage::Chat(_) => "chat",
            ServerMessage::Gift(_) => "gift",
            ServerMessage::Like(_) => "like",
            ServerMessage::Viewer(_) => "viewer",
            ServerMessage::Error(_) => "error",
        }
    }
}
