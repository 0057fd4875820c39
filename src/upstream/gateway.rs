//! Webcast Gateway Connector
//!
//! Connects to a webcast event gateway over WebSocket. The gateway holds the
//! actual streaming-service connection and streams one username's events as
//! JSON text frames:
//!
//! ```json
//! {"event": "chat", "data": {"uniqueId": "viewer1", "comment": "hello"}}
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{EventSender, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamSession};

type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the gateway connector
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway URL template; `{username}` is replaced with the encoded username
    pub url: String,
    /// Optional bound on the connect handshake
    pub connect_timeout_secs: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8081/webcast/{username}".to_string(),
            connect_timeout_secs: None,
        }
    }
}

impl GatewayConfig {
    /// Gateway URL for a username
    pub fn url_for(&self, username: &str) -> String {
        self.url
            .replace("{username}", &urlencoding::encode(username))
    }
}

/// One frame from the gateway
#[derive(Debug, Deserialize)]
struct GatewayFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Production [`UpstreamConnector`]
pub struct GatewayConnector {
    config: GatewayConfig,
}

impl GatewayConnector {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    async fn open(&self, url: &str) -> Result<GatewayStream, UpstreamError> {
        let connecting = tokio_tungstenite::connect_async(url);
        let (stream, _response) = match self.config.connect_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), connecting)
                .await
                .map_err(|_| UpstreamError::Timeout(secs))??,
            None => connecting.await?,
        };
        Ok(stream)
    }
}

#[async_trait]
impl UpstreamConnector for GatewayConnector {
    async fn connect(
        &self,
        username: &str,
        events: EventSender,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        let url = self.config.url_for(username);
        tracing::debug!(username = %username, url = %url, "Connecting to gateway");

        let stream = self.open(&url).await?;
        let (close_tx, close_rx) = oneshot::channel();
        tokio::spawn(read_events(stream, events, close_rx, username.to_string()));

        tracing::info!(username = %username, "Gateway session opened");
        Ok(Box::new(GatewaySession {
            close_tx,
            username: username.to_string(),
        }))
    }
}

/// Handle to a running gateway reader task
///
/// Dropping the handle closes the session as well.
struct GatewaySession {
    close_tx: oneshot::Sender<()>,
    username: String,
}

impl UpstreamSession for GatewaySession {
    fn disconnect(self: Box<Self>) {
        let GatewaySession { close_tx, username } = *self;
        let _ = close_tx.send(());
        tracing::info!(username = %username, "Gateway session closed");
    }
}

/// Pump gateway frames into the event channel until closed
async fn read_events(
    stream: GatewayStream,
    events: EventSender,
    mut close_rx: oneshot::Receiver<()>,
    username: String,
) {
    let (mut sink, mut source) = stream.split();
    let mut saw_disconnect = false;

    let reason = loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = sink.send(Message::Close(None)).await;
                tracing::debug!(username = %username, "Gateway reader stopped");
                return;
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match serde_json::from_str::<GatewayFrame>(&text) {
                        Ok(frame) => match UpstreamEvent::from_parts(&frame.event, frame.data) {
                            Some(event) => event,
                            None => {
                                tracing::debug!(
                                    username = %username,
                                    event = %frame.event,
                                    "Ignoring unsupported gateway event"
                                );
                                continue;
                            }
                        },
                        Err(e) => {
                            tracing::warn!(username = %username, error = %e, "Malformed gateway frame");
                            UpstreamEvent::Error(format!("malformed gateway frame: {}", e))
                        }
                    };

                    if matches!(event, UpstreamEvent::Disconnected(_)) {
                        saw_disconnect = true;
                    }
                    if events.send(event).is_err() {
                        // Router is gone; nobody is listening any more.
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by gateway".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(username = %username, error = %e, "Gateway connection error");
                    let _ = events.send(UpstreamEvent::Error(e.to_string()));
                    break e.to_string();
                }
                None => break "connection closed".to_string(),
            }
        }
    };

    if !saw_disconnect {
        let _ = events.send(UpstreamEvent::Disconnected(json!({ "reason": reason })));
    }
    tracing::info!(username = %username, reason = %reason, "Gateway connection ended");
}
