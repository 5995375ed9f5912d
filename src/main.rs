// =============================================================================
// Reservoir Market Data Core — Main Entry Point
// =============================================================================
//
// Wires a RuntimeConfig, an UpstreamFeed, and the full L1-L7 stack behind an
// AppState, starts the REST + WebSocket transport, and shuts everything down
// cleanly on ctrl-c.
// =============================================================================

mod api;
mod app_state;
mod errors;
mod fanout;
mod feed_adapter;
mod ingest;
mod market_data_service;
mod quality;
mod quote_cache;
mod resilience;
mod runtime_config;
mod supervisor;
mod types;
mod upstream;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;
use crate::upstream::WebSocketUpstreamFeed;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("reservoir-marketdata-core starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|err| {
        warn!(error = %err, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(host) = std::env::var("RESERVOIR_UPSTREAM_HOST") {
        config.upstream.host = host;
    }
    if let Ok(bind_addr) = std::env::var("RESERVOIR_BIND_ADDR") {
        info!(bind_addr = %bind_addr, "overriding bind address from environment");
    }

    info!(
        upstream_host = %config.upstream.host,
        upstream_port = config.upstream.port,
        "runtime config resolved"
    );

    let feed_url = format!("ws://{}:{}", config.upstream.host, config.upstream.port);
    let feed = Arc::new(WebSocketUpstreamFeed::new(feed_url, config.ingest.queue_capacity));

    let state = Arc::new(AppState::new(feed, config.clone()));
    state.start().await?;

    let bind_addr = std::env::var("RESERVOIR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let router = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind_addr = %bind_addr, "REST/WebSocket transport listening");

    let server_state = state.clone();
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            warn!(error = %err, "API server exited with error");
        }
        let _ = &server_state;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    server.abort();
    state.shutdown().await;

    if let Err(err) = config.save(CONFIG_PATH) {
        warn!(error = %err, "failed to save runtime config on shutdown");
    }

    info!("reservoir-marketdata-core stopped");
    Ok(())
}
