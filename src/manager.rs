//! Workload lifecycle manager.
//!
//! Owns the full lifecycle of one isolated execution environment and
//! mediates all execution traffic to it. The manager is the only component
//! that mutates session state; callers serialize access by holding the
//! manager exclusively (`&mut self` on every mutating operation).

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{SandboxError, SchedulerError};
use crate::protocol::{ExecuteRequest, ExecuteResponse};
use crate::scheduler::{manifest, Scheduler, WorkloadStatus};
use crate::session::{SandboxSession, SessionInfo, SessionState};

/// Margin added to the manager-side network timeout so the endpoint's own
/// deadline always fires first on a legitimately slow completion.
const EXECUTE_GRACE: Duration = Duration::from_secs(5);

/// Manages one sandbox session: provisioning, execution routing, recovery,
/// and teardown.
pub struct PodManager {
    config: Config,
    scheduler: Arc<dyn Scheduler>,
    client: reqwest::Client,
    session: Option<SandboxSession>,
}

impl PodManager {
    /// Creates a manager. No resources are provisioned until `start()`.
    pub fn new(config: Config, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            scheduler,
            client: reqwest::Client::new(),
            session: None,
        }
    }

    /// Current session state, `Uninitialized` if no session exists yet.
    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Uninitialized, |s| s.state)
    }

    /// Summary of the current session, if any.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(SessionInfo::from)
    }

    /// Provisions the workload and service, then waits for readiness.
    ///
    /// Idempotent: a second call on a running session returns the existing
    /// session info without touching the cluster. On a readiness timeout the
    /// resources are deliberately left in place for diagnostics; the
    /// caller's `stop()` cleans them up, and a retried `start()` reclaims
    /// them before provisioning the replacement.
    pub async fn start(&mut self) -> Result<SessionInfo, SandboxError> {
        if let Some(session) = &self.session {
            if session.state == SessionState::Running {
                debug!("Session {} already running", session.session_id());
                return Ok(SessionInfo::from(session));
            }
            // A previous start left resources behind (e.g. a readiness
            // timeout). Reclaim them before provisioning anew, otherwise
            // the old workload would be orphaned with no name left to
            // delete it by.
            self.stop().await?;
            self.session = None;
        }

        let mut session = SandboxSession::new();
        session.state = SessionState::Starting;
        let namespace = self.config.sandbox.namespace.clone();
        info!(
            "Starting sandbox session {} in namespace {namespace}",
            session.session_id()
        );

        let workload = manifest::workload_manifest(&self.config, &session);
        self.scheduler
            .create_workload(&namespace, &workload)
            .await
            .map_err(|e| SandboxError::provision(format!("workload creation failed: {e}")))?;

        // Resources now exist; keep the session so a failed startup can
        // still be torn down by stop().
        let workload_name = session.workload_name().to_string();
        let service_name = session.service_name().to_string();
        self.session = Some(session);

        self.wait_for_ready(&namespace, &workload_name).await?;

        let service = {
            let session = self.session.as_ref().ok_or(SandboxError::NotRunning)?;
            manifest::service_manifest(&self.config, session)
        };
        self.scheduler
            .create_service(&namespace, &service)
            .await
            .map_err(|e| SandboxError::provision(format!("service creation failed: {e}")))?;

        let endpoint =
            self.scheduler
                .endpoint_url(&namespace, &service_name, self.config.sandbox.port);

        let session = self.session.as_mut().ok_or(SandboxError::NotRunning)?;
        session.endpoint_url = Some(endpoint);
        session.state = SessionState::Running;
        info!("Sandbox session {} is ready", session.session_id());
        Ok(SessionInfo::from(&*session))
    }

    async fn wait_for_ready(
        &self,
        namespace: &str,
        workload_name: &str,
    ) -> Result<(), SandboxError> {
        let interval = Duration::from_secs(self.config.readiness.poll_interval_secs);
        let mut last_diagnostic = String::from("no status reported");

        for poll in 1..=self.config.readiness.max_polls {
            match self.scheduler.get_workload(namespace, workload_name).await {
                Ok(status) if status.ready => return Ok(()),
                Ok(status) => {
                    last_diagnostic = format!("phase {}, not ready", status.phase);
                }
                // The workload may not be visible immediately after creation.
                Err(e) => last_diagnostic = e.to_string(),
            }
            // No point sleeping once the last poll has been spent.
            if poll < self.config.readiness.max_polls {
                tokio::time::sleep(interval).await;
            }
        }

        Err(SandboxError::provision(format!(
            "workload {workload_name} failed to become ready within {} polls: {last_diagnostic}",
            self.config.readiness.max_polls
        )))
    }

    /// Executes code in the sandbox.
    ///
    /// An orderly in-code failure comes back as `Ok` with `success: false`;
    /// the environment stays up. A deadline overrun or transport failure is
    /// fatal to the session: the workload is restarted before the error is
    /// returned, so the caller always finds a fresh sandbox on retry.
    pub async fn execute(
        &mut self,
        code: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecuteResponse, SandboxError> {
        let (endpoint, session_id) = match &self.session {
            Some(s) if s.state == SessionState::Running => match &s.endpoint_url {
                Some(url) => (url.clone(), s.session_id().to_string()),
                None => return Err(SandboxError::NotRunning),
            },
            _ => return Err(SandboxError::NotRunning),
        };

        let session_timeout = Duration::from_secs(self.config.sandbox.timeout_secs);
        let effective = timeout.map_or(session_timeout, |t| t.min(session_timeout));

        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Executing;
        }
        debug!(
            "Executing {} bytes of code in session {session_id} (timeout {}s)",
            code.len(),
            effective.as_secs()
        );

        let request = ExecuteRequest {
            code: code.to_string(),
            timeout: effective.as_secs(),
            session_id: session_id.clone(),
        };

        let response = self
            .client
            .post(format!("{endpoint}/execute"))
            .timeout(effective + EXECUTE_GRACE)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!("Execute call failed for session {session_id}: {e}");
                let error = if e.is_timeout() {
                    SandboxError::timeout(effective)
                } else {
                    SandboxError::transport(e.to_string())
                };
                self.recover().await;
                return Err(error);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!("Endpoint returned {status} for session {session_id}");
            self.recover().await;
            return Err(SandboxError::transport(format!(
                "endpoint returned HTTP {status}"
            )));
        }

        let outcome: ExecuteResponse = match response.json().await {
            Ok(o) => o,
            Err(e) => {
                warn!("Malformed endpoint response for session {session_id}: {e}");
                self.recover().await;
                return Err(SandboxError::transport(format!(
                    "malformed endpoint response: {e}"
                )));
            }
        };

        if outcome.is_timeout() {
            // The in-process state of the restricted namespace is undefined
            // after an overrun; the environment can no longer be trusted.
            warn!(
                "Execution in session {session_id} exceeded its {}s deadline",
                effective.as_secs()
            );
            self.recover().await;
            return Err(SandboxError::timeout(effective));
        }

        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Running;
        }
        Ok(outcome)
    }

    /// Best-effort restart after a fatal execution failure. The triggering
    /// error is what the caller sees; a failed recovery is logged here and
    /// surfaces on the caller's next operation.
    async fn recover(&mut self) {
        if let Err(e) = self.restart().await {
            warn!("Sandbox recovery failed: {e}");
        }
    }

    /// Tears the session down and provisions a fresh one. The stop fully
    /// completes before the start begins; the new session has a new id and
    /// therefore new resource names.
    pub async fn restart(&mut self) -> Result<SessionInfo, SandboxError> {
        if let Some(session) = &self.session {
            info!("Restarting sandbox session {}", session.session_id());
        }
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Restarting;
        }
        self.stop().await?;
        self.session = None;
        self.start().await
    }

    /// Deletes the service first (stopping new traffic), then the workload.
    ///
    /// Already-gone resources count as success. Any other scheduler error is
    /// reported, but the session is marked stopped regardless. Calling stop
    /// on a never-started or already-stopped session is a no-op.
    pub async fn stop(&mut self) -> Result<(), SandboxError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.state == SessionState::Stopped {
            return Ok(());
        }
        session.state = SessionState::Stopping;
        let namespace = self.config.sandbox.namespace.clone();
        let service_name = session.service_name().to_string();
        let workload_name = session.workload_name().to_string();
        let session_id = session.session_id().to_string();
        info!("Stopping sandbox session {session_id}");

        let mut teardown_error: Option<String> = None;

        match self.scheduler.delete_service(&namespace, &service_name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Failed to delete service {service_name}: {e}");
                teardown_error = Some(format!("service {service_name}: {e}"));
            }
        }

        match self
            .scheduler
            .delete_workload(&namespace, &workload_name)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!("Failed to delete workload {workload_name}: {e}");
                teardown_error
                    .get_or_insert_with(|| format!("workload {workload_name}: {e}"));
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Stopped;
            session.endpoint_url = None;
        }

        match teardown_error {
            Some(message) => Err(SandboxError::teardown(message)),
            None => {
                info!("Sandbox session {session_id} stopped");
                Ok(())
            }
        }
    }

    /// Queries the scheduler for the current workload status. Read-only;
    /// safe to call in any state. `None` means no resources exist.
    pub async fn status(&self) -> Result<Option<WorkloadStatus>, SchedulerError> {
        let Some(session) = &self.session else {
            return Ok(None);
        };
        match self
            .scheduler
            .get_workload(&self.config.sandbox.namespace, session.workload_name())
            .await
        {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
