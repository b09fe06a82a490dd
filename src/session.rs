//! Sandbox session identity and lifecycle state.
//!
//! A session is one workload + service pairing. Its id is embedded in every
//! resource name so concurrent sessions never collide, and a restart always
//! constructs a fresh session, so post-restart resource names always differ
//! from the pre-restart ones.

use serde::Serialize;

const NAME_PREFIX: &str = "code-sandbox";

/// Lifecycle state of a sandbox session. Owned exclusively by the
/// [`PodManager`](crate::manager::PodManager); other components only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Starting,
    Running,
    Executing,
    Restarting,
    Stopping,
    Stopped,
}

impl SessionState {
    /// Returns true if the session's scheduler resources are expected to
    /// exist in this state.
    pub fn has_resources(self) -> bool {
        matches!(self, Self::Running | Self::Executing | Self::Restarting)
    }

    /// Returns true if the endpoint address is valid in this state.
    pub fn endpoint_valid(self) -> bool {
        matches!(self, Self::Running | Self::Executing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Executing => "executing",
            Self::Restarting => "restarting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// One provisioned sandbox instance: a workload and its service, identified
/// by a short unique token.
#[derive(Debug, Clone)]
pub struct SandboxSession {
    session_id: String,
    workload_name: String,
    service_name: String,
    /// Resolved once the workload reaches running; stale after any restart.
    pub endpoint_url: Option<String>,
    pub state: SessionState,
}

impl SandboxSession {
    /// Creates a new session with a freshly generated id.
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4()
            .to_string()
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        Self::with_id(session_id)
    }

    /// Creates a session with a caller-supplied id. Resource names are
    /// derived deterministically from it.
    pub fn with_id(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let workload_name = format!("{NAME_PREFIX}-{session_id}");
        let service_name = format!("{NAME_PREFIX}-{session_id}");
        Self {
            session_id,
            workload_name,
            service_name,
            endpoint_url: None,
            state: SessionState::Uninitialized,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workload_name(&self) -> &str {
        &self.workload_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Default for SandboxSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Session summary returned by `start()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub workload_name: String,
    pub service_name: String,
    pub state: SessionState,
}

impl From<&SandboxSession> for SessionInfo {
    fn from(session: &SandboxSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            workload_name: session.workload_name.clone(),
            service_name: session.service_name.clone(),
            state: session.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_derived_from_session_id() {
        let session = SandboxSession::with_id("abc123");
        assert_eq!(session.session_id(), "abc123");
        assert_eq!(session.workload_name(), "code-sandbox-abc123");
        assert_eq!(session.service_name(), "code-sandbox-abc123");
        assert_eq!(session.state, SessionState::Uninitialized);
        assert!(session.endpoint_url.is_none());
    }

    #[test]
    fn test_fresh_sessions_get_distinct_ids() {
        let a = SandboxSession::new();
        let b = SandboxSession::new();
        assert_ne!(a.session_id(), b.session_id());
        assert_ne!(a.workload_name(), b.workload_name());
    }

    #[test]
    fn test_resource_presence_by_state() {
        assert!(SessionState::Running.has_resources());
        assert!(SessionState::Executing.has_resources());
        assert!(SessionState::Restarting.has_resources());
        assert!(!SessionState::Stopped.has_resources());
        assert!(!SessionState::Stopping.has_resources());
        assert!(!SessionState::Uninitialized.has_resources());
    }

    #[test]
    fn test_endpoint_validity_by_state() {
        assert!(SessionState::Running.endpoint_valid());
        assert!(SessionState::Executing.endpoint_valid());
        assert!(!SessionState::Restarting.endpoint_valid());
        assert!(!SessionState::Stopped.endpoint_valid());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", SessionState::Running), "running");
        assert_eq!(format!("{}", SessionState::Uninitialized), "uninitialized");
    }
}
