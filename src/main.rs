//! commd - fixed-protocol TCP daemon
//!
//! Listens for command-packet connections and serves the status
//! exchange until shut down.

use commd_server::{CommServer, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Starting commd server");
    tracing::info!("  Host: {}", config.host);
    tracing::info!("  Port: {}", config.port);
    tracing::info!("  Backlog: {}", config.backlog);

    let server = Arc::new(CommServer::new(config));
    server.start().await;
    if !server.is_available() {
        return Err("communication interface failed to start".into());
    }
    if let Some(addr) = server.local_addr() {
        tracing::info!("  Listening on: {}", addr);
    }

    // Blocks until the shutdown signal arrives
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping server...");
    server.stop().await;

    tracing::info!("Server stopped");
    Ok(())
}
