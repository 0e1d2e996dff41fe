//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the miner reaches 1.0.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;

use super::server::SharedState;
use crate::api_client::types::{
    ErrorResponse, InfoResponse, LogResponse, MinerState, PowerRequest, StartRequest,
};
use crate::config::{ALGORITHM, APP_VERSION, BACKEND, DONATION_ADDRESS};
use crate::state::LOG_CAPACITY;
use crate::supervisor::StartError;

/// Log lines returned when the request does not say.
const DEFAULT_LOG_LINES: usize = 100;

/// Build the v0 API routes.
pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/miner", get(get_miner))
        .route("/log", get(get_log))
        .route("/info", get(get_info))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/power", put(set_power))
}

/// Error mapped to a status code and a JSON body.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

impl From<StartError> for ApiError {
    fn from(e: StartError) -> Self {
        let status = match e {
            StartError::AlreadyRunning => StatusCode::CONFLICT,
            StartError::EmptyWallet => StatusCode::BAD_REQUEST,
            StartError::BinaryNotFound(_) | StartError::SpawnFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, e.to_string())
    }
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}

/// Return the state published by the last refresh tick.
async fn get_miner(State(state): State<SharedState>) -> Json<MinerState> {
    Json(state.miner_state_rx.borrow().clone())
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    lines: Option<usize>,
}

/// Return the most recent miner log lines, oldest first.
async fn get_log(
    State(state): State<SharedState>,
    Query(query): Query<LogQuery>,
) -> Json<LogResponse> {
    let n = query.lines.unwrap_or(DEFAULT_LOG_LINES).min(LOG_CAPACITY);
    let snapshot = state.supervisor.state().snapshot();
    Json(LogResponse {
        lines: snapshot.log_tail(n).to_vec(),
    })
}

async fn get_info(State(state): State<SharedState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: APP_VERSION.to_string(),
        backend: BACKEND.to_string(),
        algorithm: ALGORITHM.to_string(),
        pool_url: state.supervisor.config().pool_url(),
        donation_address: DONATION_ADDRESS.to_string(),
    })
}

/// Current state straight from the store, for command responses that
/// should not wait for the next refresh tick.
fn fresh_state(state: &SharedState) -> Json<MinerState> {
    Json(MinerState::from(&state.supervisor.state().snapshot()))
}

/// Start a session.
async fn start(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<MinerState>, ApiError> {
    let supervisor = &state.supervisor;
    let power = req.power.unwrap_or_else(|| supervisor.state().power_mode());
    supervisor.start(&req.wallet, power).await?;
    Ok(fresh_state(&state))
}

/// Stop the session, if any. Idempotent.
async fn stop(State(state): State<SharedState>) -> Json<MinerState> {
    state.supervisor.stop().await;
    fresh_state(&state)
}

/// Change the power mode used by the next session.
async fn set_power(
    State(state): State<SharedState>,
    Json(req): Json<PowerRequest>,
) -> Json<MinerState> {
    state.supervisor.state().set_power_mode(req.mode);
    fresh_state(&state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::super::server::build_router;
    use super::*;
    use crate::config::MinerConfig;
    use crate::state::StateStore;
    use crate::supervisor::{MinerSupervisor, MockOutput};
    use crate::types::PowerMode;

    fn supervisor_with_binary(binary: PathBuf) -> Arc<MinerSupervisor> {
        let config = MinerConfig {
            binary,
            pool_host: "pool.example.com".into(),
            pool_port: 3333,
        };
        Arc::new(MinerSupervisor::new(config, StateStore::new()))
    }

    fn test_supervisor() -> Arc<MinerSupervisor> {
        supervisor_with_binary(std::env::current_exe().unwrap())
    }

    fn router(supervisor: Arc<MinerSupervisor>) -> Router {
        let (_tx, rx) = watch::channel(MinerState {
            status: "Idle".into(),
            block_height: 880_000,
            ..Default::default()
        });
        build_router(rx, supervisor)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        };
        app.oneshot(request.unwrap()).await.unwrap()
    }

    async fn json_body<T: DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(router(test_supervisor()), Method::GET, "/api/v0/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_get_miner_returns_published_state() {
        let response = send(router(test_supervisor()), Method::GET, "/api/v0/miner", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let state: MinerState = json_body(response).await;
        assert_eq!(state.block_height, 880_000);
        assert_eq!(state.status, "Idle");
    }

    #[tokio::test]
    async fn test_get_log_tail() {
        let supervisor = test_supervisor();
        supervisor.state().mutate(|s| {
            for i in 0..5 {
                s.log.push(format!("line {i}"));
            }
        });

        let app = router(supervisor);
        let tail: LogResponse =
            json_body(send(app.clone(), Method::GET, "/api/v0/log?lines=2", None).await).await;
        assert_eq!(tail.lines, vec!["line 3", "line 4"]);

        let all: LogResponse = json_body(send(app, Method::GET, "/api/v0/log", None).await).await;
        assert_eq!(all.lines.len(), 5);
    }

    #[tokio::test]
    async fn test_get_info() {
        let response = send(router(test_supervisor()), Method::GET, "/api/v0/info", None).await;
        let info: InfoResponse = json_body(response).await;

        assert_eq!(info.version, APP_VERSION);
        assert_eq!(info.backend, "cpuminer-opt");
        assert_eq!(info.algorithm, "sha256d");
        assert_eq!(info.pool_url, "stratum+tcp://pool.example.com:3333");
        assert_eq!(info.donation_address, DONATION_ADDRESS);
    }

    #[tokio::test]
    async fn test_set_power() {
        let supervisor = test_supervisor();
        let response = send(
            router(supervisor.clone()),
            Method::PUT,
            "/api/v0/power",
            Some(r#"{"mode":"low"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let state: MinerState = json_body(response).await;
        assert_eq!(state.power_mode, PowerMode::Low);
        assert_eq!(state.status, "Mining power set to: Low (1 threads)");
        assert_eq!(supervisor.state().power_mode(), PowerMode::Low);
    }

    #[tokio::test]
    async fn test_set_power_rejects_unknown_mode() {
        let response = send(
            router(test_supervisor()),
            Method::PUT,
            "/api/v0/power",
            Some(r#"{"mode":"turbo"}"#),
        )
        .await;
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_start_with_empty_wallet_is_bad_request() {
        let supervisor = test_supervisor();
        let response = send(
            router(supervisor.clone()),
            Method::POST,
            "/api/v0/start",
            Some(r#"{"wallet":"   "}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error: ErrorResponse = json_body(response).await;
        assert_eq!(error.error, "wallet address is empty");
        assert_eq!(
            supervisor.state().snapshot().status_message,
            "ERROR: wallet address is empty"
        );
    }

    #[tokio::test]
    async fn test_start_with_missing_binary_is_server_error() {
        let supervisor = supervisor_with_binary("/nonexistent/cpuminer".into());
        let response = send(
            router(supervisor),
            Method::POST,
            "/api/v0/start",
            Some(r#"{"wallet":"bc1qtest","power":"low"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_start_while_running_conflicts_and_stop_ends_session() {
        let supervisor = test_supervisor();
        let (output, _handle) = MockOutput::pair();
        supervisor.attach("bc1qrunning", output).await;

        let app = router(supervisor.clone());
        let response = send(
            app.clone(),
            Method::POST,
            "/api/v0/start",
            Some(r#"{"wallet":"bc1qother"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(supervisor.state().snapshot().wallet_address, "bc1qrunning");

        let response = send(app, Method::POST, "/api/v0/stop", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let state: MinerState = json_body(response).await;
        assert!(!state.is_mining);
        assert_eq!(state.status, "Stopped.");
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_ok() {
        let response = send(router(test_supervisor()), Method::POST, "/api/v0/stop", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let state: MinerState = json_body(response).await;
        assert!(!state.is_mining);
        assert_eq!(state.status, "Idle");
    }
}
