//! Miner process supervision.
//!
//! [`MinerSupervisor`] owns the lifecycle of one external miner at a time:
//!
//! ```text
//! Idle -> Starting -> Running -> (Stopping | exited | failed) -> Idle
//! ```
//!
//! A running session is a single task that reads the miner's combined
//! output line by line, classifies each line with [`crate::parser`], and
//! applies the result to the [`StateStore`] in one mutation per line. The
//! task is the only writer of mining-derived fields while the session is
//! active.
//!
//! Observers subscribe to [`Notification`]s; any number of views may listen
//! and a slow or absent listener never blocks the session.

mod output;
mod process;

pub use output::{MinerOutput, OutputLines};
pub use process::MinerProcess;

#[cfg(test)]
pub(crate) use output::MockOutput;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{MinerConfig, STOP_GRACE};
use crate::parser::{ConnectionEvent, MinerEvent, ParsedLine};
use crate::state::StateStore;
use crate::tracing::prelude::*;
use crate::types::PowerMode;

/// Notification queue depth per subscriber.
const NOTIFICATION_CAPACITY: usize = 64;

/// Why a session could not start. The session never begins and state is
/// left as it was, apart from the status line describing the error.
#[derive(Error, Debug)]
pub enum StartError {
    /// A session is already active
    #[error("miner is already running")]
    AlreadyRunning,

    /// The miner executable does not exist
    #[error("miner binary not found at {}", .0.display())]
    BinaryNotFound(PathBuf),

    /// The payout address is blank
    #[error("wallet address is empty")]
    EmptyWallet,

    /// The operating system refused to start the process
    #[error("failed to start miner: {0}")]
    SpawnFailed(#[source] io::Error),
}

/// Lifecycle events for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A session began with this many miner threads.
    Started { threads: usize },
    /// The miner is connecting to the pool.
    Connecting,
    /// The pool connection is established.
    Connected,
    ShareAccepted,
    BlockFound,
    /// The pool rejected the connection; the miner was stopped.
    ConnectionFailed,
    /// The miner exited on its own.
    Exited,
    /// The session was stopped on request.
    Stopped,
}

/// Supervisor lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

/// How a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `stop()` was called.
    Cancelled,
    /// The output reported a fatal pool error. `claimed` is false when a
    /// concurrent stop ended the session first.
    Failed { claimed: bool },
    /// The output closed.
    Exited,
}

/// State shared between the supervisor and its session task.
struct Shared {
    state: StateStore,
    notify_tx: broadcast::Sender<Notification>,
    phase_tx: watch::Sender<Phase>,
    grace: Duration,
}

impl Shared {
    fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notify_tx.send(notification);
    }

    fn set_phase(&self, phase: Phase) {
        self.phase_tx.send_replace(phase);
    }

    /// End the mining session with `status`, unless it has already ended.
    ///
    /// Whoever flips `is_mining` owns the ending and is the only one to
    /// report it, so a stop racing a pool failure or an exit yields exactly
    /// one ending.
    fn claim_end(&self, status: &str) -> bool {
        self.state.mutate(|s| {
            if !s.is_mining {
                return false;
            }
            s.end_session();
            s.status_message = status.to_string();
            true
        })
    }
}

/// An active session: its cancellation token and reader task.
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Supervises one miner process at a time.
pub struct MinerSupervisor {
    config: MinerConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl MinerSupervisor {
    pub fn new(config: MinerConfig, state: StateStore) -> Self {
        Self::with_grace(config, state, STOP_GRACE)
    }

    /// Create a supervisor that gives a stopping miner `grace` to exit
    /// before killing it.
    pub fn with_grace(config: MinerConfig, state: StateStore, grace: Duration) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (phase_tx, _) = watch::channel(Phase::Idle);

        Self {
            config,
            shared: Arc::new(Shared {
                state,
                notify_tx,
                phase_tx,
                grace,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.shared.state
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Listen for lifecycle notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.notify_tx.subscribe()
    }

    /// Watch the lifecycle phase.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn current_phase(&self) -> Phase {
        *self.shared.phase_tx.borrow()
    }

    /// Launch the miner for `wallet` using `power_mode`'s thread policy.
    ///
    /// On success `power_mode` also becomes the recorded policy.
    pub async fn start(&self, wallet: &str, power_mode: PowerMode) -> Result<(), StartError> {
        let mut slot = self.session.lock().await;
        self.check_idle(&mut slot).await?;

        let result = self.validate(wallet);
        let wallet = match result {
            Ok(wallet) => wallet,
            Err(e) => {
                self.report_start_error(&e);
                return Err(e);
            }
        };

        self.shared.state.mutate(|s| s.power_mode = power_mode);
        let threads = power_mode.threads();
        let args = self.config.args(wallet, threads);

        self.shared.set_phase(Phase::Starting);
        info!(
            binary = %self.config.binary.display(),
            pool = %self.config.pool_url(),
            threads,
            "Starting miner"
        );

        let (process, output) = match MinerProcess::spawn(&self.config.binary, &args) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.shared.set_phase(Phase::Idle);
                let e = StartError::SpawnFailed(e);
                self.report_start_error(&e);
                return Err(e);
            }
        };

        info!(pid = process.pid(), "Miner running");
        *slot = Some(self.launch(wallet, threads, output, Some(process)));
        Ok(())
    }

    /// Stop the active session, if any.
    ///
    /// Idempotent: calling this while idle does nothing. Waits for the miner
    /// to exit, killing it if it outlives the grace period.
    ///
    /// A session that already ended on its own (pool failure or exit) keeps
    /// its status and notification; stop only collects it.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            return;
        };

        if self.current_phase() == Phase::Idle {
            if let Err(e) = session.task.await {
                warn!(error = %e, "Session task failed");
            }
            return;
        }

        self.shared.set_phase(Phase::Stopping);
        let claimed = self.shared.claim_end("Stopped.");

        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "Session task failed");
        }

        self.shared.set_phase(Phase::Idle);
        if claimed {
            self.shared.notify(Notification::Stopped);
            info!("Miner stopped");
        }
    }

    /// Reject a start while a session is live, collecting any session that
    /// already ended.
    async fn check_idle(&self, slot: &mut Option<Session>) -> Result<(), StartError> {
        if self.current_phase() != Phase::Idle {
            return Err(StartError::AlreadyRunning);
        }
        if let Some(finished) = slot.take() {
            if let Err(e) = finished.task.await {
                warn!(error = %e, "Session task failed");
            }
        }
        Ok(())
    }

    fn validate<'a>(&self, wallet: &'a str) -> Result<&'a str, StartError> {
        if !self.config.binary.exists() {
            return Err(StartError::BinaryNotFound(self.config.binary.clone()));
        }

        let wallet = wallet.trim();
        if wallet.is_empty() {
            return Err(StartError::EmptyWallet);
        }
        Ok(wallet)
    }

    fn report_start_error(&self, error: &StartError) {
        warn!(error = %error, "Miner not started");
        let status = format!("ERROR: {}", error);
        self.shared.state.mutate(|s| s.status_message = status);
    }

    /// Enter the running state and spawn the session task.
    fn launch<O>(
        &self,
        wallet: &str,
        threads: usize,
        output: O,
        process: Option<MinerProcess>,
    ) -> Session
    where
        O: MinerOutput + 'static,
    {
        self.shared
            .state
            .mutate(|s| s.begin_session(wallet, threads, Instant::now()));
        self.shared.set_phase(Phase::Running);
        self.shared.notify(Notification::Started { threads });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            self.shared.clone(),
            output,
            process,
            cancel.clone(),
        ));

        Session { cancel, task }
    }

    /// Run a session over scripted output with no child process.
    #[cfg(test)]
    pub(crate) async fn attach<O>(&self, wallet: &str, output: O)
    where
        O: MinerOutput + 'static,
    {
        let mut slot = self.session.lock().await;
        self.check_idle(&mut slot)
            .await
            .expect("attach while running");
        *slot = Some(self.launch(wallet, 1, output, None));
    }
}

/// Session task: read output until it closes, a fatal line arrives, or the
/// session is cancelled; then clean up.
async fn run_session<O>(
    shared: Arc<Shared>,
    mut output: O,
    process: Option<MinerProcess>,
    cancel: CancellationToken,
) where
    O: MinerOutput,
{
    let end = read_output(&shared, &mut output, &cancel).await;
    drop(output);

    // The process is gone before the phase returns to Idle and before
    // observers hear about the ending, so a start prompted by the
    // notification is accepted.
    match end {
        SessionEnd::Cancelled => {
            // stop() owns the state transition; only the process is ours.
            if let Some(process) = process {
                process.terminate(shared.grace).await;
            }
        }
        SessionEnd::Failed { claimed } => {
            if claimed {
                shared.set_phase(Phase::Stopping);
            }
            if let Some(process) = process {
                process.terminate(shared.grace).await;
            }
            if claimed {
                shared.set_phase(Phase::Idle);
                shared.notify(Notification::ConnectionFailed);
            }
        }
        SessionEnd::Exited => {
            let claimed = shared.claim_end("Miner exited.");
            if claimed {
                shared.set_phase(Phase::Stopping);
            }
            if let Some(mut process) = process {
                process.reap(shared.grace).await;
            }
            if claimed {
                info!("Miner exited");
                shared.set_phase(Phase::Idle);
                shared.notify(Notification::Exited);
            }
        }
    }
}

async fn read_output<O>(shared: &Shared, output: &mut O, cancel: &CancellationToken) -> SessionEnd
where
    O: MinerOutput,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = output.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return SessionEnd::Exited,
            Err(e) => {
                warn!(error = %e, "Failed to read miner output");
                return SessionEnd::Exited;
            }
        };

        if let LineOutcome::Fatal { claimed } = apply_line(shared, &line) {
            return SessionEnd::Failed { claimed };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOutcome {
    Continue,
    /// The session must end; `claimed` as in [`SessionEnd::Failed`].
    Fatal { claimed: bool },
}

/// Apply one raw output line to state and emit its notifications.
fn apply_line(shared: &Shared, raw: &str) -> LineOutcome {
    let line = raw.trim();
    if line.is_empty() {
        return LineOutcome::Continue;
    }
    trace!(line, "Miner output");

    let parsed = ParsedLine::parse(line);
    let mut notifications = Vec::with_capacity(2);

    let outcome = shared.state.mutate(|s| {
        s.log.push(line);

        match parsed.connection {
            Some(ConnectionEvent::Failed) => {
                let claimed = s.is_mining;
                if claimed {
                    s.end_session();
                    s.status_message = "Pool connection failed. Miner stopped.".to_string();
                }
                return LineOutcome::Fatal { claimed };
            }
            Some(ConnectionEvent::Established) => {
                s.is_connected = true;
                s.status_message = "Connected to pool, mining...".to_string();
                notifications.push(Notification::Connected);
            }
            Some(ConnectionEvent::Connecting) => {
                s.is_connected = false;
                s.status_message = "Connecting to pool...".to_string();
                notifications.push(Notification::Connecting);
            }
            None => {}
        }

        match parsed.event {
            Some(MinerEvent::BlockFound) => {
                s.blocks_found += 1;
                s.block_alert = true;
                s.status_message = "BLOCK FOUND! Check pool / wallet.".to_string();
                notifications.push(Notification::BlockFound);
            }
            Some(MinerEvent::ShareAccepted) => {
                s.set_routine_status("Share accepted by pool.");
                notifications.push(Notification::ShareAccepted);
            }
            None => {}
        }

        if let Some(job_id) = &parsed.job_id {
            s.job_id = job_id.clone();
            s.block_attempts += 1;
        }
        if let Some(rate) = parsed.hashrate {
            s.current_hashrate = rate;
        }
        if let Some(height) = parsed.block_height.filter(|h| *h > 0) {
            s.block_height = height;
        }
        if let Some(extranonce) = &parsed.extranonce {
            s.user_id = extranonce.clone();
        }

        LineOutcome::Continue
    });

    if let LineOutcome::Fatal { .. } = outcome {
        warn!(line, "Pool connection failed, stopping miner");
        return outcome;
    }

    for notification in notifications {
        match notification {
            Notification::BlockFound => info!(line, "Block found"),
            Notification::ShareAccepted => debug!("Share accepted"),
            _ => {}
        }
        shared.notify(notification);
    }

    LineOutcome::Continue
}
