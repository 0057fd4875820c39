//! Event Router
//!
//! One router task per session drains the session's event channel in order
//! and hands each event to whoever subscribes to the username at that moment.

use tokio::sync::mpsc;

use super::{RegistryRef, Username};
use crate::upstream::UpstreamEvent;
use crate::websocket::{ServerMessage, StatusPayload};

impl From<UpstreamEvent> for ServerMessage {
    fn from(event: UpstreamEvent) -> Self {
        match event {
            UpstreamEvent::Connected(data) => StatusPayload::ok("connected").data(data).into(),
            UpstreamEvent::Disconnected(data) => {
                StatusPayload::failed("disconnected").data(data).into()
            }
            UpstreamEvent::Chat(data) => ServerMessage::Chat(data),
            UpstreamEvent::Gift(data) => ServerMessage::Gift(data),
            UpstreamEvent::Like(data) => ServerMessage::Like(data),
            UpstreamEvent::Viewer(data) => ServerMessage::Viewer(data),
            UpstreamEvent::Error(err) => StatusPayload::failed("connector error").err(err).into(),
        }
    }
}

/// Forwards one session's upstream events to its subscribers
pub(crate) struct EventRouter {
    username: Username,
    generation: u64,
    registry: RegistryRef,
}

impl EventRouter {
    pub(crate) fn new(username: Username, generation: u64, registry: RegistryRef) -> Self {
        Self {
            username,
            generation,
            registry,
        }
    }

    /// Run until the connector drops its sender or the task is aborted
    pub(crate) async fn run(self, mut events: mpsc::UnboundedReceiver<UpstreamEvent>) {
        while let Some(event) = events.recv().await {
            let kind = event.kind();
            if let UpstreamEvent::Error(err) = &event {
                tracing::warn!(username = %self.username, error = %err, "Upstream error");
            }

            let delivered = self
                .registry
                .deliver(&self.username, self.generation, event.into())
                .await;

            tracing::trace!(
                username = %self.username,
                event = kind,
                subscribers = delivered,
                "Routed upstream event"
            );
        }

        tracing::debug!(username = %self.username, "Upstream event stream ended");
    }
}
