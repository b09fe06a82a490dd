//! Mock scheduler for testing.
//!
//! Provides an in-memory scheduler that tracks created resources and lets
//! tests control readiness timing and inject failures, so the full
//! lifecycle can be exercised without a cluster.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Scheduler, WorkloadPhase, WorkloadStatus};
use crate::error::SchedulerError;
use crate::scheduler::manifest::{ServiceManifest, WorkloadManifest};

#[derive(Debug, Default)]
struct Inner {
    workloads: HashMap<String, WorkloadRecord>,
    services: Vec<String>,
    workloads_created: Vec<String>,
    services_created: Vec<String>,
    workloads_deleted: Vec<String>,
    services_deleted: Vec<String>,
    fail_next_create: Option<String>,
    endpoint_url: Option<String>,
}

#[derive(Debug)]
struct WorkloadRecord {
    polls: u32,
    started_at: chrono::DateTime<Utc>,
}

/// An in-memory scheduler for tests.
///
/// Workloads report ready after a configurable number of status polls.
/// All created/deleted resource names are recorded for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockScheduler {
    inner: Arc<Mutex<Inner>>,
    ready_after_polls: u32,
}

impl MockScheduler {
    /// Creates a mock whose workloads are ready on the first poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose workloads become ready after `polls` status
    /// queries.
    pub fn ready_after(polls: u32) -> Self {
        Self {
            inner: Arc::default(),
            ready_after_polls: polls,
        }
    }

    /// Routes execution traffic to `url` instead of the cluster DNS name,
    /// so tests can point the manager at a local in-process endpoint.
    pub fn set_endpoint_url(&self, url: impl Into<String>) {
        self.inner.lock().unwrap().endpoint_url = Some(url.into());
    }

    /// Makes the next create call (workload or service) fail with `message`.
    pub fn fail_next_create(&self, message: impl Into<String>) {
        self.inner.lock().unwrap().fail_next_create = Some(message.into());
    }

    /// Names of all workloads ever created, in creation order.
    pub fn workloads_created(&self) -> Vec<String> {
        self.inner.lock().unwrap().workloads_created.clone()
    }

    /// Names of all services ever created, in creation order.
    pub fn services_created(&self) -> Vec<String> {
        self.inner.lock().unwrap().services_created.clone()
    }

    /// Names of all deleted workloads.
    pub fn workloads_deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().workloads_deleted.clone()
    }

    /// Names of all deleted services.
    pub fn services_deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().services_deleted.clone()
    }

    /// Returns true if the named workload currently exists.
    pub fn workload_exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().workloads.contains_key(name)
    }

    /// Returns true if the named service currently exists.
    pub fn service_exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().services.iter().any(|s| s == name)
    }

    fn take_injected_failure(&self) -> Option<String> {
        self.inner.lock().unwrap().fail_next_create.take()
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn create_workload(
        &self,
        _namespace: &str,
        manifest: &WorkloadManifest,
    ) -> Result<(), SchedulerError> {
        if let Some(message) = self.take_injected_failure() {
            return Err(SchedulerError::api(422, message));
        }
        let name = manifest.metadata.name.clone();
        let mut inner = self.inner.lock().unwrap();
        inner.workloads.insert(
            name.clone(),
            WorkloadRecord {
                polls: 0,
                started_at: Utc::now(),
            },
        );
        inner.workloads_created.push(name);
        Ok(())
    }

    async fn delete_workload(&self, _namespace: &str, name: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.workloads.remove(name).is_none() {
            return Err(SchedulerError::not_found(name));
        }
        inner.workloads_deleted.push(name.to_string());
        Ok(())
    }

    async fn get_workload(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let ready_after = self.ready_after_polls;
        let record = inner
            .workloads
            .get_mut(name)
            .ok_or_else(|| SchedulerError::not_found(name))?;
        record.polls += 1;
        let ready = record.polls > ready_after;
        Ok(WorkloadStatus {
            name: name.to_string(),
            phase: if ready {
                WorkloadPhase::Running
            } else {
                WorkloadPhase::Pending
            },
            ready,
            restarts: 0,
            started_at: Some(record.started_at),
        })
    }

    async fn create_service(
        &self,
        _namespace: &str,
        manifest: &ServiceManifest,
    ) -> Result<(), SchedulerError> {
        if let Some(message) = self.take_injected_failure() {
            return Err(SchedulerError::api(422, message));
        }
        let name = manifest.metadata.name.clone();
        let mut inner = self.inner.lock().unwrap();
        inner.services.push(name.clone());
        inner.services_created.push(name);
        Ok(())
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.services.len();
        inner.services.retain(|s| s != name);
        if inner.services.len() == before {
            return Err(SchedulerError::not_found(name));
        }
        inner.services_deleted.push(name.to_string());
        Ok(())
    }

    fn endpoint_url(&self, namespace: &str, service: &str, port: u16) -> String {
        self.inner
            .lock()
            .unwrap()
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("http://{service}.{namespace}.svc.cluster.local:{port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::SandboxSession;

    fn manifests() -> (WorkloadManifest, ServiceManifest) {
        let config = Config::default();
        let session = SandboxSession::with_id("abc123");
        (
            crate::scheduler::manifest::workload_manifest(&config, &session),
            crate::scheduler::manifest::service_manifest(&config, &session),
        )
    }

    #[tokio::test]
    async fn test_create_and_get_workload() {
        let scheduler = MockScheduler::new();
        let (workload, _) = manifests();
        scheduler.create_workload("default", &workload).await.unwrap();

        assert!(scheduler.workload_exists("code-sandbox-abc123"));
        let status = scheduler
            .get_workload("default", "code-sandbox-abc123")
            .await
            .unwrap();
        assert!(status.ready);
        assert_eq!(status.phase, WorkloadPhase::Running);
    }

    #[tokio::test]
    async fn test_ready_after_polls() {
        let scheduler = MockScheduler::ready_after(2);
        let (workload, _) = manifests();
        scheduler.create_workload("default", &workload).await.unwrap();

        let s1 = scheduler.get_workload("default", "code-sandbox-abc123").await.unwrap();
        assert!(!s1.ready);
        assert_eq!(s1.phase, WorkloadPhase::Pending);
        let s2 = scheduler.get_workload("default", "code-sandbox-abc123").await.unwrap();
        assert!(!s2.ready);
        let s3 = scheduler.get_workload("default", "code-sandbox-abc123").await.unwrap();
        assert!(s3.ready);
    }

    #[tokio::test]
    async fn test_delete_missing_workload_is_not_found() {
        let scheduler = MockScheduler::new();
        let err = scheduler
            .delete_workload("default", "code-sandbox-gone")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let scheduler = MockScheduler::new();
        scheduler.fail_next_create("quota exceeded");
        let (workload, _) = manifests();
        let err = scheduler
            .create_workload("default", &workload)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        // Failure is one-shot
        scheduler.create_workload("default", &workload).await.unwrap();
    }

    #[tokio::test]
    async fn test_service_lifecycle_and_counters() {
        let scheduler = MockScheduler::new();
        let (_, service) = manifests();
        scheduler.create_service("default", &service).await.unwrap();
        assert!(scheduler.service_exists("code-sandbox-abc123"));

        scheduler
            .delete_service("default", "code-sandbox-abc123")
            .await
            .unwrap();
        assert!(!scheduler.service_exists("code-sandbox-abc123"));
        assert_eq!(scheduler.services_created().len(), 1);
        assert_eq!(scheduler.services_deleted().len(), 1);
    }

    #[test]
    fn test_endpoint_url_override() {
        let scheduler = MockScheduler::new();
        assert_eq!(
            scheduler.endpoint_url("default", "svc", 8080),
            "http://svc.default.svc.cluster.local:8080"
        );
        scheduler.set_endpoint_url("http://127.0.0.1:12345");
        assert_eq!(
            scheduler.endpoint_url("default", "svc", 8080),
            "http://127.0.0.1:12345"
        );
    }
}
