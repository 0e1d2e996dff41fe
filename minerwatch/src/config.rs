//! Runtime configuration.
//!
//! Everything is read from environment variables with sensible defaults, so
//! the daemon runs with no configuration at all against the default pool.
//!
//! # Environment Variables
//!
//! - `MINERWATCH_BINARY`: miner executable (default: platform path under
//!   `miner/` next to this executable)
//! - `MINERWATCH_POOL_HOST`: pool host (default: `solo.ckpool.org`)
//! - `MINERWATCH_POOL_PORT`: pool port (default: `3333`)
//! - `MINERWATCH_WALLET`: start mining to this address at boot (optional)
//! - `MINERWATCH_POWER`: `high`, `medium` or `low` (default: `high`)
//! - `MINERWATCH_API_BIND`: API listen address (default: `127.0.0.1:7786`)
//! - `MINERWATCH_POLL_SECS`: price/height poll interval (default: `600`)

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::error::{Error, Result};
use crate::types::PowerMode;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Miner implementation this supervisor drives.
pub const BACKEND: &str = "cpuminer-opt";

pub const DEFAULT_POOL_HOST: &str = "solo.ckpool.org";
pub const DEFAULT_POOL_PORT: u16 = 3333;

/// Hash algorithm passed to the miner.
pub const ALGORITHM: &str = "sha256d";

/// Solo pools ignore the password; by convention it is "x".
pub const POOL_PASSWORD: &str = "x";

/// Shown to users who want to support development. Not used by mining.
pub const DONATION_ADDRESS: &str = "bc1qkjdpk5awqwswx7rl4nclh90x8gntm93g3y4mnc";

/// How long a stopping miner gets to exit before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Refresh tick for hashrate integration and projections.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Default interval between price/height polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(600);

/// Per-request timeout for price/height fetches.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch the miner.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Miner executable
    pub binary: PathBuf,

    /// Pool host name
    pub pool_host: String,

    /// Pool TCP port
    pub pool_port: u16,
}

impl MinerConfig {
    pub fn pool_url(&self) -> String {
        format!("stratum+tcp://{}:{}", self.pool_host, self.pool_port)
    }

    /// Command-line arguments for a session mining to `wallet`.
    pub fn args(&self, wallet: &str, threads: usize) -> Vec<String> {
        vec![
            "-a".into(),
            ALGORITHM.into(),
            "-o".into(),
            self.pool_url(),
            "-u".into(),
            wallet.into(),
            "-p".into(),
            POOL_PASSWORD.into(),
            "-t".into(),
            threads.to_string(),
        ]
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            binary: default_binary_path(),
            pool_host: DEFAULT_POOL_HOST.to_string(),
            pool_port: DEFAULT_POOL_PORT,
        }
    }
}

/// Platform-specific location of the bundled miner, relative to `base`.
pub fn platform_binary(base: &Path) -> PathBuf {
    let dir = base.join("miner");
    if cfg!(target_os = "windows") {
        dir.join("windows").join("cpuminer.exe")
    } else if cfg!(target_os = "macos") {
        dir.join("mac").join("cpuminer")
    } else {
        dir.join("linux").join("cpuminer")
    }
}

/// Bundled miner next to the running executable, falling back to the
/// working directory if the executable path is unavailable.
fn default_binary_path() -> PathBuf {
    let base = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    platform_binary(&base)
}

/// Complete daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub miner: MinerConfig,

    /// Start a session to this address at boot.
    pub wallet: Option<String>,

    pub power_mode: PowerMode,

    pub api: ApiConfig,

    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            miner: MinerConfig::default(),
            wallet: None,
            power_mode: PowerMode::default(),
            api: ApiConfig::default(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(binary) = lookup("MINERWATCH_BINARY") {
            config.miner.binary = PathBuf::from(binary);
        }

        if let Some(host) = lookup("MINERWATCH_POOL_HOST") {
            let host = host.trim();
            if host.is_empty() {
                return Err(Error::Config("MINERWATCH_POOL_HOST is empty".into()));
            }
            config.miner.pool_host = host.to_string();
        }

        if let Some(port) = lookup("MINERWATCH_POOL_PORT") {
            config.miner.pool_port = port.trim().parse().map_err(|_| {
                Error::Config(format!("MINERWATCH_POOL_PORT is not a port: '{}'", port))
            })?;
        }

        config.wallet = lookup("MINERWATCH_WALLET")
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());

        if let Some(power) = lookup("MINERWATCH_POWER") {
            config.power_mode = power
                .parse()
                .map_err(|e| Error::Config(format!("MINERWATCH_POWER: {}", e)))?;
        }

        if let Some(bind) = lookup("MINERWATCH_API_BIND") {
            config.api.bind_addr = bind;
        }

        if let Some(secs) = lookup("MINERWATCH_POLL_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("MINERWATCH_POLL_SECS is not a number: '{}'", secs))
            })?;
            if secs == 0 {
                return Err(Error::Config("MINERWATCH_POLL_SECS must be positive".into()));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use serial_test::serial;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.miner.pool_host, DEFAULT_POOL_HOST);
        assert_eq!(config.miner.pool_port, DEFAULT_POOL_PORT);
        assert_eq!(config.power_mode, PowerMode::High);
        assert_eq!(config.poll_interval, POLL_INTERVAL);
        assert!(config.wallet.is_none());
        assert!(config.miner.binary.ends_with(platform_binary(Path::new(""))));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("MINERWATCH_BINARY", "/opt/cpuminer"),
            ("MINERWATCH_POOL_HOST", "pool.example.com"),
            ("MINERWATCH_POOL_PORT", "4444"),
            ("MINERWATCH_WALLET", "  bc1qexample  "),
            ("MINERWATCH_POWER", "medium"),
            ("MINERWATCH_API_BIND", "127.0.0.1:9000"),
            ("MINERWATCH_POLL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.miner.binary, PathBuf::from("/opt/cpuminer"));
        assert_eq!(config.miner.pool_url(), "stratum+tcp://pool.example.com:4444");
        assert_eq!(config.wallet.as_deref(), Some("bc1qexample"));
        assert_eq!(config.power_mode, PowerMode::Medium);
        assert_eq!(config.api.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_blank_wallet_is_ignored() {
        let config = Config::from_lookup(lookup_from(&[("MINERWATCH_WALLET", "   ")])).unwrap();
        assert!(config.wallet.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        for vars in [
            [("MINERWATCH_POOL_PORT", "70000")],
            [("MINERWATCH_POWER", "turbo")],
            [("MINERWATCH_POLL_SECS", "0")],
            [("MINERWATCH_POOL_HOST", " ")],
        ] {
            let result = Config::from_lookup(lookup_from(&vars));
            assert!(matches!(result, Err(Error::Config(_))), "{:?}", vars);
        }
    }

    #[test]
    fn test_miner_args() {
        let miner = MinerConfig {
            binary: PathBuf::from("cpuminer"),
            pool_host: "solo.ckpool.org".into(),
            pool_port: 3333,
        };
        assert_eq!(
            miner.args("bc1qaddr", 4),
            vec![
                "-a",
                "sha256d",
                "-o",
                "stratum+tcp://solo.ckpool.org:3333",
                "-u",
                "bc1qaddr",
                "-p",
                "x",
                "-t",
                "4"
            ]
        );
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        // SAFETY: serialised with other environment-mutating tests.
        unsafe {
            env::set_var("MINERWATCH_POOL_PORT", "3334");
            env::remove_var("MINERWATCH_POWER");
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.miner.pool_port, 3334);

        unsafe {
            env::remove_var("MINERWATCH_POOL_PORT");
        }
    }
}
