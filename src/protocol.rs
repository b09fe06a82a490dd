//! Wire types for the manager ⇄ execution endpoint protocol.
//!
//! JSON over HTTP. The same structs are used by the client side in
//! [`manager`](crate::manager) and the server side in
//! [`server`](crate::server), so the two cannot drift apart.

use serde::{Deserialize, Serialize};

/// `POST /execute` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Source text to run. Opaque to the orchestration layer.
    pub code: String,
    /// Wall-clock deadline in seconds, enforced by the endpoint host process.
    pub timeout: u64,
    /// Session the request belongs to, for log correlation.
    pub session_id: String,
}

/// `POST /execute` response body.
///
/// Code failures are data, not HTTP errors: the endpoint returns 200 with
/// `success: false` so interactive callers can display the error without
/// special-casing status codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    /// Value bound to the conventional `result` variable, present on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// `"<ExceptionType>: <message>"` summary, present on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Distinguishes a deadline overrun (fatal to the session) from an
    /// orderly in-code exception (environment stays healthy).
    #[serde(default)]
    pub error_kind: Option<ExecErrorKind>,
    /// Wall-clock execution time in seconds.
    pub execution_time: f64,
}

/// Failure classification carried alongside `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrorKind {
    /// The code exceeded the wall-clock deadline.
    Timeout,
    /// The code raised an exception inside the restricted namespace.
    Exception,
}

impl ExecuteResponse {
    /// A successful execution carrying `result`.
    pub fn ok(result: serde_json::Value, execution_time: f64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            execution_time,
        }
    }

    /// An orderly in-code failure.
    pub fn exception(error: impl Into<String>, execution_time: f64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            error_kind: Some(ExecErrorKind::Exception),
            execution_time,
        }
    }

    /// A deadline overrun.
    pub fn timed_out(timeout_secs: u64, execution_time: f64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(format!(
                "Execution timed out after {timeout_secs} seconds"
            )),
            error_kind: Some(ExecErrorKind::Timeout),
            execution_time,
        }
    }

    /// Returns true if this response reports a deadline overrun.
    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ExecErrorKind::Timeout)
    }
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_id: String,
}

/// `GET /ready` response body (the 200 case; 503 carries `{detail}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub session_id: String,
}

/// `GET /metrics` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub cpu_percent: f32,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub total: u64,
    pub available: u64,
    pub percent: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub total: u64,
    pub free: u64,
    pub percent: f32,
}
