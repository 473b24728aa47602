//! Rendezvous Server Application
//!
//! Hosts the room registry peers use to discover each other.

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicemesh::config::AppConfig;
use voicemesh::rendezvous::{serve, RoomRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voicemesh rendezvous server");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(std::path::Path::new(&path))?,
        None => AppConfig::load_default()?,
    };

    let registry = Arc::new(RoomRegistry::new(config.server.room_capacity));
    serve(registry, config.server.socket_addr()).await?;

    Ok(())
}
