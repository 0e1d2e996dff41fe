//! CPU power policy for the miner process.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much of the machine the miner is allowed to use.
///
/// Changing the mode takes effect on the next session start; a running
/// miner keeps the thread count it was launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    /// All logical cores.
    #[default]
    High,
    /// Half the logical cores, rounded up.
    Medium,
    /// A single core.
    Low,
}

impl PowerMode {
    /// Number of miner threads for this mode on a machine with `cores`
    /// logical cores. Never less than one.
    pub fn threads_for(self, cores: usize) -> usize {
        let threads = match self {
            PowerMode::High => cores,
            PowerMode::Medium => cores.div_ceil(2),
            PowerMode::Low => 1,
        };
        threads.max(1)
    }

    /// Thread count for this mode on the current machine.
    pub fn threads(self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.threads_for(cores)
    }

    /// Capitalised label used in status messages.
    pub fn label(self) -> &'static str {
        match self {
            PowerMode::High => "High",
            PowerMode::Medium => "Medium",
            PowerMode::Low => "Low",
        }
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerMode::High => "high",
            PowerMode::Medium => "medium",
            PowerMode::Low => "low",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an unknown power mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown power mode '{0}' (expected high, medium or low)")]
pub struct ParsePowerModeError(pub String);

impl FromStr for PowerMode {
    type Err = ParsePowerModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(PowerMode::High),
            "medium" => Ok(PowerMode::Medium),
            "low" => Ok(PowerMode::Low),
            _ => Err(ParsePowerModeError(s.to_string())),
        }
    }
}
