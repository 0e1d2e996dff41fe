//! Rendering state for consumers.
//!
//! Once per refresh tick the daemon integrates hashrate, takes a
//! [`MiningSnapshot`], and hands it to every registered [`Projection`].
//! Projections are read-only: they never write back into the store and
//! never see the lock.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api_client::types::MinerState;
use crate::state::{MiningSnapshot, StateStore};
use crate::tracing::prelude::*;

/// A consumer of periodic state snapshots.
pub trait Projection: Send {
    fn render(&mut self, snapshot: &MiningSnapshot);
}

/// Format a duration as "1h 2m 3s", "2m 3s" or "3s".
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

impl From<&MiningSnapshot> for MinerState {
    fn from(snap: &MiningSnapshot) -> Self {
        Self {
            wallet_address: snap.wallet_address.clone(),
            is_mining: snap.is_mining,
            is_connected: snap.is_connected,
            hashrate: snap.current_hashrate.as_hashes(),
            hashrate_display: snap.current_hashrate.to_human_readable(),
            total_hashes: snap.total_hashes,
            uptime_secs: snap.uptime.as_secs(),
            uptime_display: format_uptime(snap.uptime),
            block_height: snap.block_height,
            btc_price_usd: snap.btc_price_usd,
            user_id: snap.user_id.clone(),
            job_id: snap.job_id.clone(),
            block_attempts: snap.block_attempts,
            blocks_found: snap.blocks_found,
            status: snap.status_message.clone(),
            block_alert: snap.block_alert,
            power_mode: snap.power_mode,
        }
    }
}

/// Publishes each snapshot as an API [`MinerState`] on a watch channel.
pub struct WatchProjection {
    tx: watch::Sender<MinerState>,
}

impl WatchProjection {
    /// Create the projection and a receiver for the API server.
    pub fn new() -> (Self, watch::Receiver<MinerState>) {
        let (tx, rx) = watch::channel(MinerState::default());
        (Self { tx }, rx)
    }
}

impl Projection for WatchProjection {
    fn render(&mut self, snapshot: &MiningSnapshot) {
        let next = MinerState::from(snapshot);
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Logs status transitions, so a headless daemon still tells the story.
#[derive(Default)]
pub struct LogProjection {
    last_status: Option<String>,
    alerted: bool,
}

impl LogProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for LogProjection {
    fn render(&mut self, snapshot: &MiningSnapshot) {
        if self.last_status.as_deref() != Some(snapshot.status_message.as_str()) {
            info!(
                mining = snapshot.is_mining,
                connected = snapshot.is_connected,
                hashrate = %snapshot.current_hashrate,
                "{}",
                snapshot.status_message
            );
            self.last_status = Some(snapshot.status_message.clone());
        }

        if snapshot.block_alert && !self.alerted {
            warn!(
                blocks_found = snapshot.blocks_found,
                height = snapshot.block_height,
                "Block found! Check pool and wallet."
            );
        }
        self.alerted = snapshot.block_alert;
    }
}

/// Integrate, snapshot and render every `interval` until `shutdown`.
///
/// The first tick fires immediately.
pub async fn refresh_task(
    state: StateStore,
    mut projections: Vec<Box<dyn Projection>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        state.apply_integration_tick(Instant::now());
        let snapshot = state.snapshot();
        for projection in projections.iter_mut() {
            projection.render(&snapshot);
        }
    }

    trace!("Refresh task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use test_case::test_case;

    use super::*;
    use crate::types::HashRate;

    #[test_case(0, "0s" ; "zero")]
    #[test_case(3, "3s" ; "seconds")]
    #[test_case(123, "2m 3s" ; "minutes")]
    #[test_case(3723, "1h 2m 3s" ; "hours")]
    #[test_case(3600, "1h 0m 0s" ; "exact hour")]
    #[test_case(90061, "25h 1m 1s" ; "over a day")]
    fn test_format_uptime(secs: u64, expected: &str) {
        assert_eq!(format_uptime(Duration::from_secs(secs)), expected);
    }

    /// Records every snapshot it is shown.
    struct Recorder(Arc<Mutex<Vec<MiningSnapshot>>>);

    impl Projection for Recorder {
        fn render(&mut self, snapshot: &MiningSnapshot) {
            self.0.lock().push(snapshot.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_integrates_and_renders() {
        let state = StateStore::new();
        state.mutate(|s| {
            s.begin_session("bc1qtest", 2, Instant::now());
            s.current_hashrate = HashRate::from_kilohashes(1.0);
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (watch, rx) = WatchProjection::new();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(refresh_task(
            state.clone(),
            vec![Box::new(watch), Box::new(Recorder(seen.clone()))],
            Duration::from_secs(1),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        task.await.unwrap();

        // Ticks at 0s, 1s, 2s and 3s.
        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0].total_hashes <= w[1].total_hashes));

        let published = rx.borrow().clone();
        assert!((published.total_hashes - 3000.0).abs() < 1.0);
        assert_eq!(published.uptime_secs, 3);
        assert_eq!(published.uptime_display, "3s");
        assert_eq!(published.hashrate_display, "1.00 kH/s");
        assert_eq!(published.wallet_address, "bc1qtest");
        assert!(published.is_mining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        refresh_task(
            StateStore::new(),
            Vec::new(),
            Duration::from_secs(1),
            shutdown,
        )
        .await;
    }

    #[test]
    fn test_watch_projection_skips_unchanged_snapshots() {
        let state = StateStore::new();
        let (mut watch, mut rx) = WatchProjection::new();

        let snapshot = state.snapshot();
        watch.render(&snapshot);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        watch.render(&snapshot);
        assert!(!rx.has_changed().unwrap());

        state.mutate(|s| s.block_height = 880_000);
        watch.render(&state.snapshot());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().block_height, 880_000);
        assert_eq!(rx.borrow().status, "Idle");
    }

    #[test]
    fn test_log_projection_tracks_alert_edge() {
        let state = StateStore::new();
        let mut log = LogProjection::new();

        log.render(&state.snapshot());
        assert_eq!(log.last_status.as_deref(), Some("Idle"));
        assert!(!log.alerted);

        state.mutate(|s| {
            s.block_alert = true;
            s.status_message = "BLOCK FOUND! Check pool / wallet.".into();
        });
        log.render(&state.snapshot());
        assert!(log.alerted);
        assert_eq!(
            log.last_status.as_deref(),
            Some("BLOCK FOUND! Check pool / wallet.")
        );

        state.mutate(|s| s.block_alert = false);
        log.render(&state.snapshot());
        assert!(!log.alerted);
    }
}
