//! Error types for sandbox orchestration.
//!
//! Two layers: [`SchedulerError`] covers the scheduler API surface and is
//! internal plumbing; [`SandboxError`] is what callers of the manager and
//! facade see. The split keeps HTTP status codes and resource names out of
//! the caller-facing taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Caller-facing sandbox failures.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The environment could not be provisioned or never became ready.
    #[error("Provisioning failed: {message}")]
    Provision { message: String },

    /// Submitted code exceeded its wall-clock deadline. Fatal to the
    /// session: the environment is restarted before this is returned.
    #[error("Execution timed out after {timeout_secs} seconds")]
    ExecutionTimeout { timeout_secs: u64 },

    /// Submitted code raised an exception. The environment stays healthy.
    #[error("Execution failed: {message}")]
    Execution { message: String },

    /// The execution endpoint could not be reached or answered garbage.
    #[error("Sandbox transport failure: {message}")]
    Transport { message: String },

    /// An operation that needs a running session found none.
    #[error("Sandbox is not running")]
    NotRunning,

    /// Teardown left resources behind.
    #[error("Teardown incomplete: {message}")]
    Teardown { message: String },
}

impl SandboxError {
    pub fn provision(message: impl Into<String>) -> Self {
        Self::Provision {
            message: message.into(),
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::ExecutionTimeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn teardown(message: impl Into<String>) -> Self {
        Self::Teardown {
            message: message.into(),
        }
    }

    /// Returns true for a deadline overrun.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ExecutionTimeout { .. })
    }

    /// Returns true for a provisioning failure.
    pub fn is_provision(&self) -> bool {
        matches!(self, Self::Provision { .. })
    }

    /// Returns true if the manager already restarted the environment as
    /// part of raising this error, so no further recovery is needed.
    pub fn is_self_healing(&self) -> bool {
        matches!(self, Self::ExecutionTimeout { .. } | Self::Transport { .. })
    }
}

/// Failures from the scheduler API.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The named resource does not exist.
    #[error("Resource not found: {name}")]
    NotFound { name: String },

    /// The scheduler rejected the request.
    #[error("Scheduler API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The scheduler could not be reached.
    #[error("Scheduler transport failure: {message}")]
    Transport { message: String },
}

impl SchedulerError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if the resource was already gone. Teardown treats this
    /// as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
