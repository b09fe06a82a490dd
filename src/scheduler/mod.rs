//! Scheduler abstraction for placing and supervising sandbox workloads.
//!
//! The manager talks to the cluster through this trait so the lifecycle
//! logic can be exercised against [`MockScheduler`] without a cluster.
//! The production implementation is [`KubeScheduler`].

mod kube;
pub mod manifest;
mod mock;

pub use kube::KubeScheduler;
pub use mock::MockScheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SchedulerError;
use manifest::{ServiceManifest, WorkloadManifest};

/// Coarse workload phase as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    /// Parses the scheduler's phase string, defaulting to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time workload status from the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadStatus {
    pub name: String,
    pub phase: WorkloadPhase,
    /// True once the scheduler's Ready condition is satisfied.
    pub ready: bool,
    pub restarts: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// Cluster operations needed to run one sandbox session.
///
/// All operations are idempotency-agnostic: the manager layers its own
/// not-found tolerance on top of `delete_*`.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submits a workload to the cluster.
    async fn create_workload(
        &self,
        namespace: &str,
        manifest: &WorkloadManifest,
    ) -> Result<(), SchedulerError>;

    /// Deletes a workload by name.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), SchedulerError>;

    /// Reads current workload phase, readiness, and restart count.
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, SchedulerError>;

    /// Submits a cluster-internal service selecting the workload.
    async fn create_service(
        &self,
        namespace: &str,
        manifest: &ServiceManifest,
    ) -> Result<(), SchedulerError>;

    /// Deletes a service by name.
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), SchedulerError>;

    /// Base URL for reaching the execution endpoint behind a service.
    fn endpoint_url(&self, namespace: &str, service: &str, port: u16) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!(WorkloadPhase::parse("Running"), WorkloadPhase::Running);
        assert_eq!(WorkloadPhase::parse("Pending"), WorkloadPhase::Pending);
        assert_eq!(WorkloadPhase::parse("Failed"), WorkloadPhase::Failed);
        assert_eq!(WorkloadPhase::parse("Succeeded"), WorkloadPhase::Succeeded);
        assert_eq!(WorkloadPhase::parse("bogus"), WorkloadPhase::Unknown);
    }
}
