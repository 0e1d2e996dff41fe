//! API client library.
//!
//! Provides a Rust client for the daemon's HTTP API, used by the CLI.

pub mod types;

use anyhow::{Context, Result};
use reqwest::{Client as HttpClient, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::types::PowerMode;
use types::{ErrorResponse, InfoResponse, LogResponse, MinerState, PowerRequest, StartRequest};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

/// HTTP client for the daemon API.
pub struct Client {
    http: HttpClient,
    base_url: String,
}

impl Client {
    /// Create a client connecting to the default local address.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    /// Create a client connecting to a specific base URL.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v0/{}",
            self.base_url,
            endpoint.trim_start_matches('/')
        )
    }

    /// Send a request and decode a JSON response, turning error bodies
    /// into readable messages.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .context("failed to connect to miner API")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            anyhow::bail!("API request failed: {}", detail);
        }
        response
            .json()
            .await
            .context("failed to parse API response")
    }

    /// Fetch the current miner state snapshot.
    pub async fn get_miner(&self) -> Result<MinerState> {
        self.call(self.http.get(self.url("miner"))).await
    }

    /// Fetch the last `lines` miner log lines.
    pub async fn get_log(&self, lines: usize) -> Result<LogResponse> {
        let request = self
            .http
            .get(self.url("log"))
            .query(&[("lines", lines)]);
        self.call(request).await
    }

    pub async fn get_info(&self) -> Result<InfoResponse> {
        self.call(self.http.get(self.url("info"))).await
    }

    /// Start mining to `wallet`, optionally overriding the power mode.
    pub async fn start(&self, wallet: &str, power: Option<PowerMode>) -> Result<MinerState> {
        let body = StartRequest {
            wallet: wallet.to_string(),
            power,
        };
        self.call(self.http.post(self.url("start")).json(&body))
            .await
    }

    pub async fn stop(&self) -> Result<MinerState> {
        self.call(self.http.post(self.url("stop"))).await
    }

    /// Set the power mode for the next session.
    pub async fn set_power(&self, mode: PowerMode) -> Result<MinerState> {
        let body = PowerRequest { mode };
        self.call(self.http.put(self.url("power")).json(&body))
            .await
    }

    /// GET an arbitrary endpoint under `/api/v0` and return the body text.
    pub async fn get_raw(&self, endpoint: &str) -> Result<String> {
        let response = self
            .http
            .get(self.url(endpoint))
            .send()
            .await
            .context("failed to connect to miner API")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API request failed: {}", status);
        }
        response.text().await.context("failed to read API response")
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        http::StatusCode,
        routing::{get, post},
    };
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_url_joins_cleanly() {
        let client = Client::with_base_url("http://host:1/".into());
        assert_eq!(client.url("miner"), "http://host:1/api/v0/miner");
        assert_eq!(client.url("/log"), "http://host:1/api/v0/log");
    }

    #[tokio::test]
    async fn test_get_miner_decodes_state() {
        let base = serve(Router::new().route(
            "/api/v0/miner",
            get(|| async {
                Json(MinerState {
                    is_mining: true,
                    blocks_found: 1,
                    ..Default::default()
                })
            }),
        ))
        .await;

        let state = Client::with_base_url(base).get_miner().await.unwrap();
        assert!(state.is_mining);
        assert_eq!(state.blocks_found, 1);
    }

    #[tokio::test]
    async fn test_error_body_becomes_message() {
        let base = serve(Router::new().route(
            "/api/v0/start",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(ErrorResponse {
                        error: "miner is already running".into(),
                    }),
                )
            }),
        ))
        .await;

        let err = Client::with_base_url(base)
            .start("bc1qtest", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("miner is already running"));
    }

    #[tokio::test]
    async fn test_get_raw_returns_text() {
        let base = serve(Router::new().route("/api/v0/health", get(|| async { "OK" }))).await;
        let body = Client::with_base_url(base).get_raw("health").await.unwrap();
        assert_eq!(body, "OK");
    }
}
