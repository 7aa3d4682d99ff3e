//! relay-gateway server entry point.
//!
//! Starts the gateway and shuts it down gracefully on Ctrl-C.

use tracing_subscriber::EnvFilter;

use relay_gateway::config::ServerConfig;
use relay_gateway::server::RelayServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting relay-gateway");

    let server = RelayServer::new(config);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    server.shutdown().await;

    Ok(())
}
