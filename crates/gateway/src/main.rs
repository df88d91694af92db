//! Gateway service entry point.
//!
//! Bridges browser WebSocket clients to the game ecosystem's TCP backends
//! and fronts the coordinator's directory protocol with a small HTTP API.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use coordinator::{CoordinatorClient, ListingSource, ServerListCache};
use gateway::{create_router, AppState, Config};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting gateway");

    let config = Config::load()?;
    info!("Configuration:");
    info!("  LISTEN_PORT: {}", config.listen_port);
    info!("  COORDINATOR_ADDR: {}", config.coordinator_addr);
    info!("  CACHE_TTL: {:?}", config.cache_ttl);
    info!("  CONNECT_TIMEOUT: {:?}", config.connect_timeout);
    info!("  MAX_WS_BUFFERED_BYTES: {}", config.max_ws_buffered_bytes);
    info!("  ALLOWED_PORTS: {:?}", config.allowed_ports);
    if config.allowed_hosts.is_empty() {
        info!("  ALLOWED_HOSTS: (any)");
    } else {
        info!("  ALLOWED_HOSTS: {:?}", config.allowed_hosts);
    }

    // Optional Prometheus exporter; the default deployment stays single-port.
    if let Ok(metrics_port) = env::var("METRICS_PORT") {
        let metrics_port: u16 = metrics_port.parse().expect("METRICS_PORT must be a number");
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()
            .expect("Failed to start Prometheus exporter");
        info!("Prometheus metrics server started on port {}", metrics_port);
    }

    let coordinator = Arc::new(CoordinatorClient::new(config.coordinator_addr.clone()));
    let cache = Arc::new(ServerListCache::new(
        coordinator.clone() as Arc<dyn ListingSource>,
        config.cache_ttl,
    ));

    // Relay sessions subscribe to this channel so shutdown reaches them
    // before the server stops accepting.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        cache,
        coordinator,
        config: Arc::new(config.clone()),
        shutdown: shutdown_rx,
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
