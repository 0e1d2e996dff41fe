//! HTTP server lifecycle and router construction.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::v0;
use crate::api_client::types::MinerState;
use crate::supervisor::MinerSupervisor;
use crate::tracing::prelude::*;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address, "127.0.0.1:7786" unless configured.
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7786".to_string(),
        }
    }
}

/// What every handler can reach.
#[derive(Clone)]
pub(crate) struct SharedState {
    /// Latest state rendered by the refresh tick.
    pub miner_state_rx: watch::Receiver<MinerState>,
    /// Target of start, stop and power commands.
    pub supervisor: Arc<MinerSupervisor>,
}

/// Bind `config.bind_addr` and serve the API until `shutdown` is cancelled.
pub async fn serve(
    config: ApiConfig,
    shutdown: CancellationToken,
    miner_state_rx: watch::Receiver<MinerState>,
    supervisor: Arc<MinerSupervisor>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API to {}", config.bind_addr))?;
    serve_on(
        listener,
        build_router(miner_state_rx, supervisor),
        shutdown,
    )
    .await
}

/// Serve `app` on an already bound listener.
async fn serve_on(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(url = %format!("http://{}", addr), "API server listening.");
    warn_if_exposed(addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    debug!("API server stopped");
    Ok(())
}

/// The API can start and stop a process on this machine and has no
/// authentication.
fn warn_if_exposed(addr: SocketAddr) {
    if !addr.ip().is_loopback() {
        warn!(
            ip = %addr.ip(),
            "API server is reachable from the network. \
             Anyone who can connect can start and stop the miner."
        );
    }
}

/// Build the application router with all API routes.
pub(crate) fn build_router(
    miner_state_rx: watch::Receiver<MinerState>,
    supervisor: Arc<MinerSupervisor>,
) -> Router {
    Router::new()
        .nest("/api/v0", v0::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(SharedState {
            miner_state_rx,
            supervisor,
        })
}
