//! Live Relay HTTP API
//!
//! HTTP layer for the relay, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - Browser connection for watching live streams
//!
//! ## Health
//! - `GET /healthz` - Liveness probe, fixed `ok` body
//! - `GET /health` - Status with connection and session counts
//!
//! ## Static
//! - Anything else is served from the configured static directory
//!
//! # Example
//!
//! ```rust,ignore
//! use live_relay::api::{serve, ApiConfig, AppState};
//! use live_relay::upstream::{GatewayConfig, GatewayConnector};
//! use live_relay::websocket::HubConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = Arc::new(GatewayConnector::new(GatewayConfig::default()));
//!     let state = AppState::new(ApiConfig::default(), HubConfig::default(), connector);
//!     serve(state).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::websocket::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origin);
    let static_files = ServeDir::new(&state.config.static_dir);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/healthz", get(routes::health::liveness))
        .route("/health", get(routes::health::full_health))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// CORS policy for the configured origin
fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origin == "*" {
        return layer.allow_origin(Any);
    }

    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(
                origin = %allowed_origin,
                error = %e,
                "Invalid allowed origin, cross-origin requests will be refused"
            );
            layer
        }
    }
}

/// Start the server and run until a shutdown signal arrives
pub async fn serve(state: AppState) -> ApiResult<()> {
    let addr = state.config.addr();
    let registry = Arc::clone(&state.registry);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Live relay listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    registry.shutdown().await;
    tracing::info!("Live relay shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
