//! WebSocket Client Connections
//!
//! Browser clients connect here to watch live streams.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Tracks active connections and delivers messages to them
//! - **Handler**: Handles WebSocket upgrade and message processing
//! - **Messages**: Defines client and server message formats
//!
//! ## Usage
//!
//! Clients connect to `/ws` and send a `watch` event:
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:3000/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({event: 'watch', data: '@alice'}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const {event: name, data} = JSON.parse(event.data);
//!   console.log(name, data);
//! };
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{ConnectionHandle, ConnectionHub, ConnectionId, HubConfig, HubError};
pub use messages::{ClientMessage, ServerMessage, StatusPayload};
