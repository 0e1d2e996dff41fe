//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients.

use serde::{Deserialize, Serialize};

use crate::types::PowerMode;

/// Miner state as rendered once per refresh tick.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct MinerState {
    pub wallet_address: String,
    pub is_mining: bool,
    pub is_connected: bool,
    /// Last reported hashrate in hashes per second.
    pub hashrate: f64,
    /// Hashrate scaled for display, e.g. "12.50 kH/s".
    pub hashrate_display: String,
    /// Integrated hash estimate since daemon start.
    pub total_hashes: f64,
    pub uptime_secs: u64,
    /// Uptime for display, e.g. "1h 2m 3s".
    pub uptime_display: String,
    /// Chain tip height; 0 while unknown.
    pub block_height: u64,
    /// BTC spot price in USD; 0 while unknown.
    pub btc_price_usd: f64,
    /// Pool-assigned extranonce1, hex.
    pub user_id: String,
    pub job_id: String,
    pub block_attempts: u64,
    pub blocks_found: u64,
    pub status: String,
    /// Set while the current session has found a block.
    pub block_alert: bool,
    pub power_mode: PowerMode,
}

/// Tail of the miner log.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LogResponse {
    pub lines: Vec<String>,
}

/// Static facts about this build and its pool setup.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub backend: String,
    pub algorithm: String,
    pub pool_url: String,
    pub donation_address: String,
}

/// Body of `POST /start`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StartRequest {
    pub wallet: String,
    /// Power mode for this session; the current mode if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerMode>,
}

/// Body of `PUT /power`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PowerRequest {
    pub mode: PowerMode,
}

/// Error body returned with non-2xx statuses.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
