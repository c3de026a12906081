//! Hermes Binary Entry Point
//!
//! This binary runs the Hermes log collector.
//! Core functionality is provided by the `hermes` library crate.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hermes::{
    config::AppConfig,
    id::IdGenerator,
    ingest::Ingestor,
    server::{AppState, create_router},
    storage::DriverRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hermes - Log Collector
#[derive(Parser, Debug)]
#[command(name = "hermes", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "HERMES_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "HERMES_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "HERMES_SERVER_PORT")]
    server_port: Option<u16>,

    /// Id generator node (overrides config file)
    #[arg(long, env = "HERMES_NODE_ID")]
    node_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hermes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hermes - Log Collector");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}, node: {}, drivers: {}",
        config.server.bind,
        config.server.port,
        config.node_id,
        config.drivers.len(),
    );

    // Open storage drivers
    let registry = Arc::new(DriverRegistry::open(&config.drivers).await?);
    tracing::info!(main = %registry.main().name(), "Storage initialized");

    let ids = Arc::new(IdGenerator::new(config.node_id)?);
    let ingestor = Ingestor::new(Arc::clone(&registry), ids);
    let app = create_router(AppState::new(
        Arc::clone(&registry),
        ingestor,
        config.query.clone(),
    ));

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down storage...");
    registry.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
