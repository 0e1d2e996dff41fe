//! Shared mining state.
//!
//! [`StateStore`] is the single source of truth for everything the
//! supervisor, the network poller and the refresh tick know. All writes go
//! through [`StateStore::mutate`], which holds the lock for the duration of
//! one closure; readers take a [`MiningSnapshot`] copy and never hold the
//! lock while rendering.
//!
//! Timestamps are [`tokio::time::Instant`] so tests can drive the clock
//! with `tokio::time::pause()`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::types::{HashRate, PowerMode};

/// Number of miner log lines retained.
pub const LOG_CAPACITY: usize = 200;

/// Bounded FIFO of raw miner log lines, oldest first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    /// The most recent `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

/// Live mining state. Only reachable through [`StateStore`].
#[derive(Debug, Clone, Default)]
pub struct MiningState {
    /// Payout address of the current session; empty when idle.
    pub wallet_address: String,
    pub is_mining: bool,
    /// Independent of `is_mining`: a running miner may be reconnecting.
    pub is_connected: bool,
    pub current_hashrate: HashRate,
    /// Integrated hash count (see [`MiningState::integrate`]).
    pub total_hashes: f64,
    pub last_integration: Option<Instant>,
    pub mining_started: Option<Instant>,
    /// Last known chain height; 0 when unknown.
    pub block_height: u64,
    /// Last known BTC spot price; 0 when unknown.
    pub btc_price_usd: f64,
    /// Pool extranonce1, used as a display stand-in for a user id.
    pub user_id: String,
    pub job_id: String,
    pub block_attempts: u64,
    pub blocks_found: u64,
    pub status_message: String,
    /// Raised when a block is reported; cleared on the next session
    /// transition.
    pub block_alert: bool,
    pub log: LogBuffer,
    /// Thread policy for the next session start.
    pub power_mode: PowerMode,
}

impl MiningState {
    /// Idle state with nothing known yet.
    pub fn new() -> Self {
        Self {
            status_message: "Idle".to_string(),
            ..Default::default()
        }
    }

    /// Enter the mining state for a freshly spawned miner.
    pub fn begin_session(&mut self, wallet: &str, threads: usize, now: Instant) {
        self.wallet_address = wallet.to_string();
        self.is_mining = true;
        self.is_connected = false;
        self.mining_started = Some(now);
        self.last_integration = Some(now);
        self.job_id.clear();
        self.block_alert = false;
        self.status_message = format!("cpuminer running on {} threads...", threads);
    }

    /// Leave the mining state. Counters, identifiers and the integrated
    /// total survive until the process restarts.
    pub fn end_session(&mut self) {
        self.is_mining = false;
        self.is_connected = false;
        self.current_hashrate = HashRate::ZERO;
        self.mining_started = None;
        self.wallet_address.clear();
        self.block_alert = false;
    }

    /// Advance `total_hashes` by `current_hashrate * elapsed`.
    ///
    /// This is a left Riemann sum over the refresh tick, not an exact count
    /// of work: the most recent rate sample is assumed to hold for the whole
    /// interval. Accuracy improves as the tick shrinks.
    ///
    /// Elapsed time is clamped at zero and the anchor never moves backwards,
    /// so an out-of-order `now` neither subtracts work nor re-counts an
    /// interval already integrated.
    pub fn integrate(&mut self, now: Instant) {
        let Some(last) = self.last_integration else {
            self.last_integration = Some(now);
            return;
        };

        let elapsed = now.saturating_duration_since(last);
        if self.is_mining && !self.current_hashrate.is_zero() {
            self.total_hashes += self.current_hashrate.hashes_in(elapsed);
        }

        if now > last {
            self.last_integration = Some(now);
        }
    }

    /// Time since session start, or zero when not mining.
    pub fn uptime(&self, now: Instant) -> Duration {
        match (self.is_mining, self.mining_started) {
            (true, Some(started)) => now.saturating_duration_since(started),
            _ => Duration::ZERO,
        }
    }

    /// Set the status line, unless it currently reports a found block.
    /// Used for routine updates that must not bury a block alert.
    pub fn set_routine_status(&mut self, status: &str) {
        if !self.status_message.contains("BLOCK FOUND") {
            self.status_message = status.to_string();
        }
    }
}

/// Immutable copy of [`MiningState`] handed to projections.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningSnapshot {
    pub wallet_address: String,
    pub is_mining: bool,
    pub is_connected: bool,
    pub current_hashrate: HashRate,
    pub total_hashes: f64,
    pub uptime: Duration,
    pub block_height: u64,
    pub btc_price_usd: f64,
    pub user_id: String,
    pub job_id: String,
    pub block_attempts: u64,
    pub blocks_found: u64,
    pub status_message: String,
    pub block_alert: bool,
    pub log_lines: Vec<String>,
    pub power_mode: PowerMode,
}

impl MiningSnapshot {
    fn capture(state: &MiningState, now: Instant) -> Self {
        Self {
            wallet_address: state.wallet_address.clone(),
            is_mining: state.is_mining,
            is_connected: state.is_connected,
            current_hashrate: state.current_hashrate,
            total_hashes: state.total_hashes,
            uptime: state.uptime(now),
            block_height: state.block_height,
            btc_price_usd: state.btc_price_usd,
            user_id: state.user_id.clone(),
            job_id: state.job_id.clone(),
            block_attempts: state.block_attempts,
            blocks_found: state.blocks_found,
            status_message: state.status_message.clone(),
            block_alert: state.block_alert,
            log_lines: state.log.iter().cloned().collect(),
            power_mode: state.power_mode,
        }
    }

    /// The most recent `n` log lines, oldest first.
    pub fn log_tail(&self, n: usize) -> &[String] {
        let skip = self.log_lines.len().saturating_sub(n);
        &self.log_lines[skip..]
    }
}

/// Shared handle to the mining state.
///
/// Cloning is cheap; all clones refer to the same state.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<MiningState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MiningState::new())),
        }
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> MiningSnapshot {
        let now = Instant::now();
        MiningSnapshot::capture(&self.inner.read(), now)
    }

    /// Apply one mutation atomically. Keep `f` short: it runs under the
    /// write lock.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut MiningState) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Integrate hashrate up to `now`.
    pub fn apply_integration_tick(&self, now: Instant) {
        self.mutate(|state| state.integrate(now));
    }

    /// Select the thread policy used by the next session.
    pub fn set_power_mode(&self, mode: PowerMode) {
        let threads = mode.threads();
        self.mutate(|state| {
            state.power_mode = mode;
            state.status_message = format!(
                "Mining power set to: {} ({} threads)",
                mode.label(),
                threads
            );
        });
    }

    pub fn power_mode(&self) -> PowerMode {
        self.inner.read().power_mode
    }

    pub fn is_mining(&self) -> bool {
        self.inner.read().is_mining
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_keeps_last_lines_in_order() {
        let mut log = LogBuffer::default();
        for i in 0..250 {
            log.push(format!("line {i}"));
        }

        assert_eq!(log.len(), LOG_CAPACITY);
        let lines: Vec<_> = log.iter().cloned().collect();
        assert_eq!(lines.first().map(String::as_str), Some("line 50"));
        assert_eq!(lines.last().map(String::as_str), Some("line 249"));
        for (offset, line) in lines.iter().enumerate() {
            assert_eq!(*line, format!("line {}", offset + 50));
        }
    }

    #[test]
    fn test_log_tail() {
        let mut log = LogBuffer::new(5);
        for i in 0..5 {
            log.push(i.to_string());
        }
        assert_eq!(log.tail(2), vec!["3", "4"]);
        assert_eq!(log.tail(10).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_accumulates_while_mining() {
        let store = StateStore::new();
        let start = Instant::now();
        store.mutate(|s| {
            s.begin_session("bc1qtest", 4, start);
            s.current_hashrate = HashRate(1_000.0);
        });

        for step in 1..=10 {
            store.apply_integration_tick(start + Duration::from_millis(100 * step));
        }

        let total = store.snapshot().total_hashes;
        assert!((total - 1_000.0).abs() < 1e-6, "total {total}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_converges_with_finer_ticks() {
        // Constant rate H over D seconds should integrate to H*D regardless
        // of granularity; coarser ticks only lose the trailing partial tick.
        let rate = 250.0;
        let duration = Duration::from_secs(10);

        for granularity_ms in [1_000u64, 100, 10] {
            let mut state = MiningState::new();
            let start = Instant::now();
            state.begin_session("addr", 1, start);
            state.current_hashrate = HashRate(rate);

            let steps = duration.as_millis() as u64 / granularity_ms;
            for step in 1..=steps {
                state.integrate(start + Duration::from_millis(step * granularity_ms));
            }

            let expected = rate * duration.as_secs_f64();
            assert!(
                (state.total_hashes - expected).abs() < 1e-6,
                "granularity {granularity_ms}ms: {} != {expected}",
                state.total_hashes
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_never_goes_backwards() {
        let mut state = MiningState::new();
        let start = Instant::now();
        state.begin_session("addr", 1, start);
        state.current_hashrate = HashRate(100.0);

        state.integrate(start + Duration::from_secs(2));
        assert_eq!(state.total_hashes, 200.0);

        // A stale timestamp adds nothing and does not rewind the anchor.
        state.integrate(start + Duration::from_secs(1));
        assert_eq!(state.total_hashes, 200.0);
        assert_eq!(state.last_integration, Some(start + Duration::from_secs(2)));

        state.integrate(start + Duration::from_secs(3));
        assert_eq!(state.total_hashes, 300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_integration_frozen_when_not_mining() {
        let mut state = MiningState::new();
        let start = Instant::now();
        state.last_integration = Some(start);
        state.current_hashrate = HashRate(100.0);

        state.integrate(start + Duration::from_secs(5));
        assert_eq!(state.total_hashes, 0.0);
        // The anchor still advances, so resuming does not back-fill.
        assert_eq!(state.last_integration, Some(start + Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uptime_tracks_session() {
        let store = StateStore::new();
        let start = Instant::now();
        store.mutate(|s| s.begin_session("addr", 2, start));

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(store.snapshot().uptime, Duration::from_secs(90));

        store.mutate(|s| s.end_session());
        let snap = store.snapshot();
        assert_eq!(snap.uptime, Duration::ZERO);
        assert!(!snap.is_mining);
        assert!(snap.wallet_address.is_empty());
    }

    #[test]
    fn test_end_session_keeps_counters() {
        let mut state = MiningState::new();
        state.block_attempts = 3;
        state.blocks_found = 1;
        state.total_hashes = 42.0;
        state.job_id = "ab12".into();
        state.is_mining = true;
        state.current_hashrate = HashRate(10.0);

        state.end_session();

        assert_eq!(state.block_attempts, 3);
        assert_eq!(state.blocks_found, 1);
        assert_eq!(state.total_hashes, 42.0);
        assert_eq!(state.job_id, "ab12");
        assert!(state.current_hashrate.is_zero());
    }

    #[test]
    fn test_routine_status_does_not_bury_block_alert() {
        let mut state = MiningState::new();
        state.status_message = "BLOCK FOUND! Check pool / wallet.".into();
        state.set_routine_status("Share accepted by pool.");
        assert_eq!(state.status_message, "BLOCK FOUND! Check pool / wallet.");

        state.status_message = "Connected to pool, mining...".into();
        state.set_routine_status("Share accepted by pool.");
        assert_eq!(state.status_message, "Share accepted by pool.");
    }

    #[test]
    fn test_set_power_mode_reports_threads() {
        let store = StateStore::new();
        store.set_power_mode(PowerMode::Low);
        let snap = store.snapshot();
        assert_eq!(snap.power_mode, PowerMode::Low);
        assert_eq!(snap.status_message, "Mining power set to: Low (1 threads)");
    }
}
