//! HTTP surfaces of the classifier: the JSON inference API and the
//! human-facing web front end that forwards uploads to it.

use std::net::SocketAddr;

use anyhow::Context as _;
use axum::Router;
use tracing::{error, info};

pub mod inference;
pub mod logging;
pub mod web;

/// Serves `app` on `addr` until ctrl-c is received, then drains in-flight
/// requests.
pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!("failed to listen for ctrl-c: {e}"),
    }
}
