//! Execution endpoint served from inside the sandbox workload.
//!
//! The only process with access to submitted code. Exposes the execute
//! route plus the liveness/readiness probes the scheduler steers by and a
//! metrics route for operators. Code failures are returned as data with
//! HTTP 200; non-2xx responses are reserved for transport-level faults.

pub mod metrics;
mod runner;

pub use runner::{CodeRunner, PythonRunner, RunOutcome, ScriptedRunner};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::protocol::{
    ExecErrorKind, ExecuteRequest, ExecuteResponse, HealthResponse, ReadyResponse,
};

/// Shared endpoint state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn CodeRunner>,
    pub session_id: String,
}

impl AppState {
    /// Creates endpoint state for a session.
    pub fn new(runner: Arc<dyn CodeRunner>, session_id: impl Into<String>) -> Self {
        Self {
            runner,
            session_id: session_id.into(),
        }
    }
}

/// Builds the endpoint router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/execute", post(execute))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the endpoint on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .context("execution endpoint server failed")
}

/// Binds and serves the endpoint on `0.0.0.0:{port}`.
pub async fn run_server(port: u16, state: AppState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Execution endpoint listening on {addr}");
    serve(listener, state).await
}

/// Process liveness only; no dependency checks. The scheduler's liveness
/// probe kills and replaces the workload when this stops answering.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        session_id: state.session_id,
    })
}

/// Verifies the restricted namespace's required libraries are importable.
/// The scheduler routes traffic only once this returns 200.
async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, (StatusCode, Json<serde_json::Value>)> {
    match state.runner.ready().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready".to_string(),
            session_id: state.session_id,
        })),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "detail": format!("Not ready: {e}") })),
        )),
    }
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    info!(
        "Executing code for session {} (timeout {}s)",
        request.session_id, request.timeout
    );
    let started = Instant::now();
    let outcome = state
        .runner
        .run(&request.code, Duration::from_secs(request.timeout))
        .await;
    let execution_time = started.elapsed().as_secs_f64();

    if outcome.success {
        info!(
            "Code executed successfully in {execution_time:.2}s for session {}",
            request.session_id
        );
    } else {
        info!(
            "Code execution failed after {execution_time:.2}s for session {}: {}",
            request.session_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    Json(if outcome.success {
        ExecuteResponse::ok(
            outcome.result.unwrap_or(serde_json::Value::Null),
            execution_time,
        )
    } else {
        match outcome.kind {
            Some(ExecErrorKind::Timeout) => {
                ExecuteResponse::timed_out(request.timeout, execution_time)
            }
            _ => ExecuteResponse::exception(
                outcome.error.unwrap_or_else(|| "unknown error".to_string()),
                execution_time,
            ),
        }
    })
}

async fn metrics_handler() -> Json<crate::protocol::MetricsResponse> {
    Json(metrics::snapshot().await)
}
