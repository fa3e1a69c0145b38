//! Pingboard - LAN endpoint reachability board.
//!
//! Tracks an ordered, pinnable list of named endpoints and reports on
//! demand whether each one is reachable and how long the check took.

mod config;
mod probe;
mod store;
mod web;

use config::ServerConfig;
use store::Store;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pingboard=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pingboard on port {}...", cfg.http_port);
    tracing::info!("Using target list at {}", cfg.data_path);

    // Open the target store
    let store = Arc::new(Store::open(&cfg.data_path)?);
    tracing::info!("Target store loaded with {} targets", store.list().len());

    // Start web server
    let server = Server::new(cfg, store);
    server.start().await?;

    Ok(())
}
