//! Blocking sandbox facade for synchronous callers.
//!
//! The query pipeline calls start/execute/stop as ordinary sequential
//! operations; this facade owns a dedicated tokio runtime and drives each
//! manager operation to completion with `block_on`. It must be used from
//! synchronous code — constructing one inside an async context would nest
//! runtimes.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::error::{SandboxError, SchedulerError};
use crate::manager::PodManager;
use crate::scheduler::{KubeScheduler, Scheduler, WorkloadStatus};
use crate::session::{SessionInfo, SessionState};

/// Synchronous handle to one sandbox session.
///
/// Holds the manager exclusively for the session's lifetime, which is what
/// serializes execution: there is no way to overlap `execute_code` with
/// `stop` through a `&mut self` API.
pub struct PodSandbox {
    runtime: tokio::runtime::Runtime,
    manager: PodManager,
    started: bool,
}

impl PodSandbox {
    /// Creates a sandbox backed by the Kubernetes scheduler from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let scheduler =
            KubeScheduler::new(&config.scheduler).context("failed to build scheduler client")?;
        Self::with_scheduler(config, Arc::new(scheduler))
    }

    /// Creates a sandbox with a caller-supplied scheduler implementation.
    pub fn with_scheduler(config: Config, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build sandbox runtime")?;
        Ok(Self {
            runtime,
            manager: PodManager::new(config, scheduler),
            started: false,
        })
    }

    /// Provisions the sandbox, blocking until it is ready or provisioning
    /// fails.
    pub fn start(&mut self) -> Result<SessionInfo, SandboxError> {
        self.started = true;
        self.runtime.block_on(self.manager.start())
    }

    /// Executes code and returns the value bound to the conventional
    /// `result` variable.
    ///
    /// An exception raised by the submitted code comes back as
    /// [`SandboxError::Execution`]; the session stays up. Session-level
    /// failures come back with the sandbox already re-provisioned, either
    /// by the manager's own recovery or by the single restart attempted
    /// here, so a retry always finds a fresh environment.
    pub fn execute_code(&mut self, code: &str) -> Result<serde_json::Value, SandboxError> {
        let outcome = self.runtime.block_on(self.manager.execute(code, None));
        match outcome {
            Ok(response) if response.success => {
                Ok(response.result.unwrap_or(serde_json::Value::Null))
            }
            Ok(response) => Err(SandboxError::execution(
                response
                    .error
                    .unwrap_or_else(|| "unknown execution error".to_string()),
            )),
            Err(e) => {
                if self.started && !e.is_self_healing() {
                    if let Err(restart_err) = self.runtime.block_on(self.manager.restart()) {
                        warn!("Sandbox restart after failure did not succeed: {restart_err}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Tears the sandbox down. Safe to call if `start()` was never called
    /// or the sandbox is already stopped.
    pub fn stop(&mut self) -> Result<(), SandboxError> {
        self.started = false;
        self.runtime.block_on(self.manager.stop())
    }

    /// Current workload status from the scheduler; `None` if no resources
    /// exist.
    pub fn get_status(&self) -> Result<Option<WorkloadStatus>, SchedulerError> {
        self.runtime.block_on(self.manager.status())
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.manager.state()
    }

    /// Summary of the current session, if one exists.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.manager.session_info()
    }

    /// Runs `f` against a started sandbox, guaranteeing teardown on every
    /// exit path (including an error from `f`).
    pub fn with<T, F>(config: Config, scheduler: Arc<dyn Scheduler>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut sandbox = Self::with_scheduler(config, scheduler)?;
        sandbox.start().context("sandbox failed to start")?;
        let result = f(&mut sandbox);
        let stop_result = sandbox.stop();
        let value = result?;
        stop_result.context("sandbox teardown failed")?;
        Ok(value)
    }
}

impl Drop for PodSandbox {
    /// Backstop teardown for callers that forget `stop()`. A clean
    /// `stop()` beforehand makes this a no-op.
    fn drop(&mut self) {
        if self.started {
            if let Err(e) = self.runtime.block_on(self.manager.stop()) {
                warn!("Sandbox teardown on drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockScheduler;
    use crate::server::{self, AppState, RunOutcome, ScriptedRunner};
    use std::net::SocketAddr;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.readiness.poll_interval_secs = 0;
        config
    }

    /// Hosts the execution endpoint on its own runtime thread so facade
    /// tests can drive their own (single-threaded) runtime independently.
    fn spawn_endpoint(runner: ScriptedRunner) -> SocketAddr {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(Arc::new(runner), "facade-test");
        std::thread::spawn(move || {
            let _ = runtime.block_on(server::serve(listener, state));
        });
        addr
    }

    fn sandbox_against(
        scheduler: &MockScheduler,
        runner: ScriptedRunner,
    ) -> PodSandbox {
        let addr = spawn_endpoint(runner);
        scheduler.set_endpoint_url(format!("http://{addr}"));
        PodSandbox::with_scheduler(fast_config(), Arc::new(scheduler.clone())).unwrap()
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let scheduler = MockScheduler::new();
        let mut sandbox =
            PodSandbox::with_scheduler(fast_config(), Arc::new(scheduler.clone())).unwrap();
        sandbox.stop().unwrap();
        assert_eq!(sandbox.state(), SessionState::Uninitialized);
        assert_eq!(scheduler.workloads_deleted().len(), 0);
    }

    #[test]
    fn test_execute_before_start_provisions_nothing() {
        let scheduler = MockScheduler::new();
        let mut sandbox =
            PodSandbox::with_scheduler(fast_config(), Arc::new(scheduler.clone())).unwrap();
        let err = sandbox.execute_code("result = 1").unwrap_err();
        assert!(matches!(err, SandboxError::NotRunning));
        assert_eq!(scheduler.workloads_created().len(), 0);
    }

    #[test]
    fn test_execute_roundtrip() {
        let scheduler = MockScheduler::new();
        let mut sandbox =
            sandbox_against(&scheduler, ScriptedRunner::always_ok(serde_json::json!(42)));

        sandbox.start().unwrap();
        assert_eq!(sandbox.state(), SessionState::Running);
        let value = sandbox.execute_code("result = 42").unwrap();
        assert_eq!(value, serde_json::json!(42));
        sandbox.stop().unwrap();
        assert_eq!(sandbox.state(), SessionState::Stopped);
    }

    #[test]
    fn test_code_failure_keeps_session_up() {
        let scheduler = MockScheduler::new();
        let runner = ScriptedRunner::new(vec![RunOutcome::exception(
            "ZeroDivisionError: division by zero",
        )]);
        let mut sandbox = sandbox_against(&scheduler, runner);

        sandbox.start().unwrap();
        let err = sandbox.execute_code("result = 1/0").unwrap_err();
        assert!(matches!(err, SandboxError::Execution { .. }));
        assert!(err.to_string().contains("ZeroDivisionError"));
        // The environment itself is still healthy: same session, no
        // re-provisioning.
        assert_eq!(sandbox.state(), SessionState::Running);
        assert_eq!(scheduler.workloads_created().len(), 1);
    }

    #[test]
    fn test_timeout_self_heals_with_fresh_session() {
        let scheduler = MockScheduler::new();
        let runner = ScriptedRunner::new(vec![
            RunOutcome::timed_out(5),
            RunOutcome::ok(serde_json::json!("recovered")),
        ]);
        let mut sandbox = sandbox_against(&scheduler, runner);

        sandbox.start().unwrap();
        let before = sandbox.session_info().unwrap();

        let err = sandbox.execute_code("import time\ntime.sleep(10)").unwrap_err();
        assert!(err.is_timeout());

        // By the time the error reached us the sandbox was already
        // re-provisioned under new resource names.
        let after = sandbox.session_info().unwrap();
        assert_eq!(after.state, SessionState::Running);
        assert_ne!(before.workload_name, after.workload_name);

        let value = sandbox.execute_code("result = 'x'").unwrap();
        assert_eq!(value, serde_json::json!("recovered"));
    }

    #[test]
    fn test_with_scope_guarantees_teardown() {
        let scheduler = MockScheduler::new();
        let addr = spawn_endpoint(ScriptedRunner::always_ok(serde_json::json!(1)));
        scheduler.set_endpoint_url(format!("http://{addr}"));

        let result: anyhow::Result<serde_json::Value> = PodSandbox::with(
            fast_config(),
            Arc::new(scheduler.clone()),
            |sandbox| Ok(sandbox.execute_code("result = 1")?),
        );
        assert_eq!(result.unwrap(), serde_json::json!(1));
        assert_eq!(scheduler.workloads_created().len(), 1);
        assert_eq!(scheduler.workloads_deleted().len(), 1);
    }

    #[test]
    fn test_with_scope_tears_down_on_error() {
        let scheduler = MockScheduler::new();
        let addr = spawn_endpoint(ScriptedRunner::always_ok(serde_json::json!(1)));
        scheduler.set_endpoint_url(format!("http://{addr}"));

        let result: anyhow::Result<()> = PodSandbox::with(
            fast_config(),
            Arc::new(scheduler.clone()),
            |_| anyhow::bail!("caller gave up"),
        );
        assert!(result.is_err());
        assert_eq!(scheduler.workloads_deleted().len(), 1);
    }

    #[test]
    fn test_drop_stops_started_sandbox() {
        let scheduler = MockScheduler::new();
        {
            let mut sandbox = sandbox_against(
                &scheduler,
                ScriptedRunner::always_ok(serde_json::json!(1)),
            );
            sandbox.start().unwrap();
            // Dropped without stop().
        }
        assert_eq!(scheduler.workloads_deleted().len(), 1);
    }
}
