//! Line-oriented miner output.
//!
//! The [`MinerOutput`] trait abstracts where log lines come from, so the
//! session loop can run over a real child process (production) or a
//! channel fed by a test.

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Source of raw miner log lines.
#[async_trait]
pub trait MinerOutput: Send {
    /// Read the next line, including any trailing newline.
    ///
    /// Returns `None` once the output has closed for good.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Combined stdout/stderr of a spawned miner.
pub struct OutputLines {
    rx: mpsc::Receiver<String>,
}

impl OutputLines {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl MinerOutput for OutputLines {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// Channel-backed output for deterministic testing.
///
/// Create a pair with [`MockOutput::pair()`]; the output goes to the
/// supervisor, the handle stays with the test. Dropping the handle closes
/// the output, which the supervisor sees as the miner exiting.
#[cfg(test)]
pub(crate) struct MockOutput {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Test-side handle for a [`MockOutput`].
#[cfg(test)]
pub(crate) struct MockOutputHandle {
    tx: mpsc::UnboundedSender<String>,
}

#[cfg(test)]
impl MockOutput {
    /// Create a linked (output, handle) pair.
    pub fn pair() -> (Self, MockOutputHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MockOutput { rx }, MockOutputHandle { tx })
    }
}

#[cfg(test)]
#[async_trait]
impl MinerOutput for MockOutput {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
impl MockOutputHandle {
    /// Emit one line as if the miner printed it.
    pub fn send(&self, line: &str) {
        self.tx
            .send(format!("{}\n", line))
            .expect("supervisor dropped output");
    }

    /// Emit several lines in order.
    pub fn send_all(&self, lines: &[&str]) {
        for line in lines {
            self.send(line);
        }
    }
}
