//! Miner child process management.
//!
//! Spawns the miner with stdout and stderr piped, merges both streams into
//! a single line channel, and tears the process down with SIGTERM followed
//! by SIGKILL if it outlives the grace period.

use std::ffi::OsStr;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::output::OutputLines;
use crate::tracing::prelude::*;

/// Buffered lines between the pipe readers and the session loop.
const LINE_CHANNEL_DEPTH: usize = 256;

/// Longest line forwarded in one piece. Longer output is split.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// A running miner process.
pub struct MinerProcess {
    child: Child,
    pid: Option<u32>,
}

impl MinerProcess {
    /// Spawn `program` with `args`, capturing stdout and stderr.
    ///
    /// Returns the process handle and a line stream that yields output from
    /// both pipes in arrival order. The stream ends once both pipes close.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> io::Result<(Self, OutputLines)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_DEPTH);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, line_tx));
        }

        debug!(pid, "Miner process spawned");
        Ok((Self { child, pid }, OutputLines::new(line_rx)))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to exit, escalating to a kill after `grace`.
    ///
    /// Signal delivery failures are logged and otherwise ignored; this
    /// always returns once the process is gone or has been killed.
    pub async fn terminate(mut self, grace: Duration) {
        if let Err(e) = self.request_exit() {
            warn!(pid = self.pid, error = %e, "Failed to signal miner process");
        }
        self.reap(grace).await;
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    pub async fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, %status, "Miner process exited");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(pid = self.pid, error = %e, "Failed to wait for miner process");
                None
            }
            Err(_) => {
                warn!(pid = self.pid, ?grace, "Miner process did not exit in time, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(pid = self.pid, error = %e, "Failed to kill miner process");
                }
                None
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // id() is None once the child has been reaped; nothing to signal.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Forward lines from one pipe into the shared channel.
///
/// Bytes are decoded lossily: a miner printing invalid UTF-8 must not end
/// the session. A line longer than [`MAX_LINE_BYTES`] arrives as several
/// pieces.
async fn pump_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::with_capacity(512);

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Miner pipe read failed");
                break;
            }
        }
    }
}
