//! Live Relay CLI
//!
//! Watch a live stream through a running relay and print its events.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use live_relay::websocket::{ClientMessage, ServerMessage};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "live-relay-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch live streams through a running relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://localhost:3000/ws", global = true)]
    pub url: String,

    /// Print raw JSON frames
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch a username and print its events until Ctrl+C
    Watch {
        /// Username, with or without a leading @
        username: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { username } => watch(&cli.url, &username, cli.json).await,
    }
}

async fn watch(url: &str, username: &str, raw: bool) -> anyhow::Result<()> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {}", url))?;

    let request = serde_json::to_string(&ClientMessage::Watch(Some(username.to_string())))?;
    ws.send(Message::Text(request)).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = ws.close(None).await;
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if raw {
                        println!("{}", text);
                        continue;
                    }
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => println!("{}", describe(&msg)),
                        Err(_) => println!("{}", text),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    eprintln!("Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// One-line rendering of a relay message
fn describe(msg: &ServerMessage) -> String {
    match msg {
        ServerMessage::Status(status) => {
            let state = if status.ok { "ok" } else { "failed" };
            match &status.err {
                Some(err) => format!("[status] {}: {} ({})", state, status.msg, err),
                None => format!("[status] {}: {}", state, status.msg),
            }
        }
        ServerMessage::Chat(data) => match (field(data, "uniqueId"), field(data, "comment")) {
            (Some(user), Some(comment)) => format!("[chat] {}: {}", user, comment),
            _ => format!("[chat] {}", data),
        },
        ServerMessage::Error(message) => format!("[error] {}", message),
        ServerMessage::Gift(data) | ServerMessage::Like(data) | ServerMessage::Viewer(data) => {
            format!("[{}] {}", msg.event_name(), data)
        }
    }
}

fn field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}
