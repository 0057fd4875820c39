//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use super::hub::ConnectionHub;
use super::messages::{ClientMessage, ServerMessage, StatusPayload};
use crate::api::AppState;
use crate::registry::{RegistryError, SubscriptionRegistry, WatchOutcome};

/// WebSocket upgrade handler
///
/// This is the entry point for browser connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, registry))
}

/// Handle an established WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    hub: Arc<ConnectionHub>,
    registry: Arc<SubscriptionRegistry>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket connection");
            if let Ok(text) = serde_json::to_string(&ServerMessage::Error(e.to_string())) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        tracing::debug!(
                            connection_id = %conn_id_for_send,
                            "WebSocket send failed, closing connection"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                }
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let registry_for_recv = Arc::clone(&registry);
    let conn_id_for_recv = connection_id.clone();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    // Task to receive messages from WebSocket and handle them.
    // Watches run in their own tasks so a slow upstream connect never stops
    // the socket from being read; the set is handed back for cleanup.
    let mut recv_task = tokio::spawn(async move {
        let mut watches = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                Some(_) = watches.join_next(), if !watches.is_empty() => {}
                frame = receiver.next() => match frame {
                    Some(Ok(msg)) => {
                        let keep_open = handle_ws_message(
                            &hub_for_recv,
                            &registry_for_recv,
                            &conn_id_for_recv,
                            msg,
                            &mut watches,
                        )
                        .await;
                        if !keep_open {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            connection_id = %conn_id_for_recv,
                            error = %e,
                            "WebSocket receive error"
                        );
                        break;
                    }
                    None => break,
                }
            }
        }
        watches
    });

    // Wait for either task to complete
    let watches = tokio::select! {
        _ = &mut send_task => {
            let _ = stop_tx.send(());
            (&mut recv_task).await
        }
        result = &mut recv_task => {
            send_task.abort();
            result
        }
    };

    // Cleanup: stop in-flight watches, then drop the connection's
    // subscriptions before it stops being reachable
    match watches {
        Ok(mut watches) => watches.shutdown().await,
        Err(e) => tracing::error!(connection_id = %connection_id, error = %e, "Receive task failed"),
    }
    let closed = registry.unwatch(&connection_id).await;
    if !closed.is_empty() {
        tracing::debug!(
            connection_id = %connection_id,
            sessions = ?closed,
            "Closed sessions on disconnect"
        );
    }
    hub.unregister(&connection_id).await;
}

/// Handle a received WebSocket message
///
/// Returns false if the connection should be closed.
async fn handle_ws_message(
    hub: &Arc<ConnectionHub>,
    registry: &Arc<SubscriptionRegistry>,
    connection_id: &str,
    message: Message,
    watches: &mut JoinSet<()>,
) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(hub, registry, connection_id, client_msg, watches);
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        text = %text,
                        "Invalid client message"
                    );
                    // Send error but keep connection open
                    let error_msg = ServerMessage::Error(format!("Invalid message format: {}", e));
                    let _ = hub.send_to(connection_id, error_msg).await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let error_msg = ServerMessage::Error("Binary messages not supported".to_string());
            let _ = hub.send_to(connection_id, error_msg).await;
            true
        }
        // Axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

/// Handle a parsed client message
fn handle_client_message(
    hub: &Arc<ConnectionHub>,
    registry: &Arc<SubscriptionRegistry>,
    connection_id: &str,
    message: ClientMessage,
    watches: &mut JoinSet<()>,
) {
    match message {
        ClientMessage::Watch(raw_username) => {
            let hub = Arc::clone(hub);
            let registry = Arc::clone(registry);
            let connection_id = connection_id.to_string();
            let raw_username = raw_username.unwrap_or_default();

            watches.spawn(async move {
                let reply = watch_reply(registry.watch(&connection_id, &raw_username).await);
                if let Some(reply) = reply {
                    let _ = hub.send_to(&connection_id, reply).await;
                }
            });
        }
    }
}

/// Message for the client that asked to watch
fn watch_reply(result: Result<WatchOutcome, RegistryError>) -> Option<ServerMessage> {
    match result {
        Ok(WatchOutcome::Joined(username)) => {
            Some(StatusPayload::ok(format!("Watching {}", username)).into())
        }
        Ok(WatchOutcome::Connected(username)) => {
            Some(StatusPayload::ok(format!("Connected to {}", username)).into())
        }
        Err(RegistryError::InvalidInput) => {
            Some(ServerMessage::Error(RegistryError::InvalidInput.to_string()))
        }
        Err(RegistryError::ConnectFailure { username, reason }) => {
            tracing::warn!(username = %username, error = %reason, "Watch failed");
            Some(StatusPayload::failed("failed to connect").err(reason).into())
        }
        // The requester already left.
        Err(RegistryError::Abandoned(_)) => None,
    }
}
