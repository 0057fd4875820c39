//! Live Relay Server
//!
//! Run with: cargo run --bin live-relay
//!
//! # Configuration
//!
//! Environment variables:
//! - `PORT`: Port to listen on (default: 3000)
//! - `ALLOWED_ORIGIN`: Allowed CORS origin (default: *)
//! - `LIVE_RELAY_UPSTREAM_URL`: Gateway URL template containing `{username}`
//! - `RUST_LOG`: Log filter (default from config: live_relay=info)

use anyhow::Context;
use clap::{Parser, Subcommand};
use live_relay::api::{serve, AppState};
use live_relay::config::{generate_default_config, Config, LoggingConfig};
use live_relay::upstream::GatewayConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{
    fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser)]
#[command(name = "live-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay live-stream events to browser WebSocket clients")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server (default)
    Serve,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Config { output }) = &cli.command {
        let template = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, template)
                    .with_context(|| format!("failed to write {:?}", path))?;
                eprintln!("Wrote default config to {:?}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    // Config loading logs through a bootstrap subscriber until the configured
    // one is installed.
    let config = tracing::subscriber::with_default(bootstrap_subscriber(std::io::stderr), || {
        load_config(&cli)
    })?;

    init_tracing(&config.logging);

    tracing::info!("Starting live relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        upstream = %config.upstream.url,
        allowed_origin = %config.server.allowed_origin,
        static_dir = %config.server.static_dir,
        "Configuration loaded"
    );

    let connector = Arc::new(GatewayConnector::new(config.gateway_config()));
    let state = AppState::new(config.api_config(), config.hub_config(), connector);

    serve(state).await?;

    tracing::info!("Live relay stopped");
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Logger used while the config itself is loading
fn bootstrap_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LoggingConfig::default().filter_directive()));
    fmt().with_env_filter(filter).with_writer(writer).finish()
}

/// Initialize logging; `RUST_LOG` takes precedence over the config level
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));
    let subscriber = tracing_subscriber::registry().with(filter);

    if logging.is_json() {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}
