//! Drinks catalog server binary

use anyhow::Context;
use cafe_server::{LoggingConfig, ServerConfig, build_app};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("Failed to load configuration")?;
    LoggingConfig::from_server_config(&config)
        .init()
        .context("Failed to initialize logging")?;

    let app = build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    info!(
        address = %config.bind_address,
        audience = %config.api_audience,
        "Drinks server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    info!("Drinks server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    info!("Shutdown signal received");
}
