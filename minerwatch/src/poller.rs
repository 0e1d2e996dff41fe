//! Best-effort chain height and price polling.
//!
//! [`NetworkPoller`] periodically asks a [`MarketData`] source for the chain
//! tip height and the BTC spot price and writes whatever arrives into the
//! [`StateStore`]. Failures are expected (offline machines, rate limits) and
//! are never surfaced: the field simply keeps its previous value until a
//! later round succeeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{FETCH_TIMEOUT, POLL_INTERVAL};
use crate::state::StateStore;
use crate::tracing::prelude::*;

/// Public endpoint returning the tip height as plain text.
pub const DEFAULT_HEIGHT_URL: &str = "https://blockstream.info/api/blocks/tip/height";

/// Public endpoint returning `{"bitcoin": {"usd": <price>}}`.
pub const DEFAULT_PRICE_URL: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd";

/// Source of exogenous chain data.
///
/// Implementations swallow their own errors: `None` means "no value this
/// time", for whatever reason.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_tip_height(&self) -> Option<u64>;

    async fn fetch_price(&self) -> Option<f64>;
}

/// Why a fetch produced no value. Logged, never returned to callers.
#[derive(Error, Debug)]
enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    bitcoin: UsdQuote,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

/// [`MarketData`] over public HTTP APIs.
pub struct HttpMarketData {
    http: HttpClient,
    height_url: String,
    price_url: String,
}

impl HttpMarketData {
    /// Client for the default public endpoints.
    pub fn new() -> Self {
        Self::with_urls(DEFAULT_HEIGHT_URL.to_string(), DEFAULT_PRICE_URL.to_string())
    }

    /// Client for specific endpoints.
    pub fn with_urls(height_url: String, price_url: String) -> Self {
        let http = HttpClient::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("minerwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to configure HTTP client, using defaults");
                HttpClient::new()
            });

        Self {
            http,
            height_url,
            price_url,
        }
    }

    async fn get_ok(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response)
    }

    async fn try_tip_height(&self) -> Result<u64, FetchError> {
        let body = self.get_ok(&self.height_url).await?.text().await?;
        body.trim()
            .parse()
            .map_err(|_| FetchError::Malformed(format!("height '{}'", body.trim())))
    }

    async fn try_price(&self) -> Result<f64, FetchError> {
        let quote: PriceResponse = self
            .get_ok(&self.price_url)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let usd = quote.bitcoin.usd;
        if !usd.is_finite() || usd < 0.0 {
            return Err(FetchError::Malformed(format!("price {}", usd)));
        }
        Ok(usd)
    }
}

impl Default for HttpMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn fetch_tip_height(&self) -> Option<u64> {
        self.try_tip_height()
            .await
            .inspect_err(|e| debug!(url = %self.height_url, error = %e, "Height fetch failed"))
            .ok()
    }

    async fn fetch_price(&self) -> Option<f64> {
        self.try_price()
            .await
            .inspect_err(|e| debug!(url = %self.price_url, error = %e, "Price fetch failed"))
            .ok()
    }
}

/// Periodic writer of height and price into the state store.
pub struct NetworkPoller {
    state: StateStore,
    source: Arc<dyn MarketData>,
    interval: Duration,
}

impl NetworkPoller {
    pub fn new(state: StateStore, source: Arc<dyn MarketData>) -> Self {
        Self {
            state,
            source,
            interval: POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until `shutdown` is cancelled. The first round runs immediately.
    ///
    /// Cancellation is observed between rounds only, so shutdown may wait
    /// for one in-flight round.
    pub async fn run(self, shutdown: CancellationToken) {
        debug!(interval = ?self.interval, "Network poller started");

        loop {
            self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Network poller stopped");
    }

    /// One round: fetch height, then price, each under [`FETCH_TIMEOUT`].
    pub async fn poll_once(&self) {
        let height = tokio::time::timeout(FETCH_TIMEOUT, self.source.fetch_tip_height())
            .await
            .ok()
            .flatten();
        if let Some(height) = height {
            self.state.mutate(|s| s.block_height = height);
            trace!(height, "Tip height updated");
        }

        let price = tokio::time::timeout(FETCH_TIMEOUT, self.source.fetch_price())
            .await
            .ok()
            .flatten()
            .filter(|p| p.is_finite() && *p >= 0.0);
        if let Some(price) = price {
            self.state.mutate(|s| s.btc_price_usd = price);
            trace!(price, "Price updated");
        }
    }
}
