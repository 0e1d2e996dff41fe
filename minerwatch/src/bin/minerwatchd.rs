//! Main entry point for the minerwatch daemon.

use minerwatch::{config::Config, daemon::Daemon, tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env()?;
    let daemon = Daemon::new(config);
    daemon.run().await
}
