use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::AppState;
use crate::config::ServerConfig;
use crate::errors::{Error, Result};

use super::routes::build_router;

/// Serve the HTTP API until `shutdown` is cancelled.
pub async fn start_api_server(
    config: &ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "Starting HTTP API server");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server shutdown completed");
    Ok(())
}
