//! Daemon lifecycle management for minerwatch.
//!
//! This module wires the state store, supervisor, network poller, refresh
//! tick and API server together, and handles signals and graceful
//! shutdown.

use std::sync::Arc;

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::api;
use crate::config::{Config, REFRESH_INTERVAL};
use crate::poller::{HttpMarketData, NetworkPoller};
use crate::projection::{LogProjection, Projection, WatchProjection, refresh_task};
use crate::state::StateStore;
use crate::supervisor::MinerSupervisor;
use crate::tracing::prelude::*;

/// The main daemon that coordinates supervision and telemetry.
pub struct Daemon {
    config: Config,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;

        let state = StateStore::new();
        state.mutate(|s| s.power_mode = config.power_mode);

        let supervisor = Arc::new(MinerSupervisor::new(config.miner.clone(), state.clone()));

        // Price and tip height, best effort
        let poller = NetworkPoller::new(state.clone(), Arc::new(HttpMarketData::new()))
            .with_interval(config.poll_interval);
        self.tracker.spawn(poller.run(self.shutdown.clone()));

        // Integration tick and projections
        let (watch_projection, miner_state_rx) = WatchProjection::new();
        let projections: Vec<Box<dyn Projection>> =
            vec![Box::new(watch_projection), Box::new(LogProjection::new())];
        self.tracker.spawn(refresh_task(
            state.clone(),
            projections,
            REFRESH_INTERVAL,
            self.shutdown.clone(),
        ));

        self.tracker.spawn({
            let shutdown = self.shutdown.clone();
            let supervisor = supervisor.clone();
            let api_config = config.api.clone();
            async move {
                if let Err(e) = api::serve(api_config, shutdown, miner_state_rx, supervisor).await
                {
                    error!(error = %e, "API server failed");
                }
            }
        });
        self.tracker.close();

        info!(
            pool = %config.miner.pool_url(),
            binary = %config.miner.binary.display(),
            power = %config.power_mode,
            "Started."
        );

        if let Some(wallet) = &config.wallet {
            if let Err(e) = supervisor.start(wallet, config.power_mode).await {
                warn!(error = %e, "Could not start miner at boot");
            }
        }

        wait_for_signal().await?;

        trace!("Shutting down.");
        supervisor.stop().await;
        self.shutdown.cancel();

        // Wait for all tasks to complete
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{self, SignalKind};

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT");
        },
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        },
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}
