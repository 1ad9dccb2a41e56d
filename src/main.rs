// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::historical_service::HistoricalService;
use crate::application::stream_manager::StreamConnectionManager;
use crate::infrastructure::config::load_config;
use crate::infrastructure::historical_client::HttpHistoricalSource;
use crate::infrastructure::sse_transport::SseTransport;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    compare_historical, health_check, historical, live_events, live_snapshot, live_state, pause,
    resume, update_controls, update_params,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = load_config()?;

    // Live feed (application layer over the SSE adapter)
    let transport = Arc::new(SseTransport::new(reqwest::Client::new()));
    let manager = StreamConnectionManager::spawn(transport, &config.stream);

    // Historical queries bypass the live pool entirely
    let source = Arc::new(HttpHistoricalSource::new(
        config.historical.url.clone(),
        Duration::from_secs(config.historical.timeout_secs),
    )?);
    let historical_service = HistoricalService::new(source);

    // Create application state
    let state = Arc::new(AppState {
        manager: manager.clone(),
        historical: historical_service,
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/live/params", put(update_params))
        .route("/live/controls", patch(update_controls))
        .route("/live/pause", post(pause))
        .route("/live/resume", post(resume))
        .route("/live/state", get(live_state))
        .route("/live/snapshot", get(live_snapshot))
        .route("/live/events", get(live_events))
        .route("/historical", post(historical))
        .route("/historical/compare", post(compare_historical))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server.bind.parse()?;
    tracing::info!("Starting sensor-live-feed service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.teardown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
