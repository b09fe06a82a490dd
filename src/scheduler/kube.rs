//! Kubernetes implementation of the [`Scheduler`] trait.
//!
//! Talks to the core/v1 REST API directly with reqwest, using the pod's
//! service account for authentication when running in-cluster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Scheduler, WorkloadPhase, WorkloadStatus};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::scheduler::manifest::{ServiceManifest, WorkloadManifest};

/// Scheduler backed by the Kubernetes API server.
pub struct KubeScheduler {
    client: reqwest::Client,
    api_server: String,
    token: Option<String>,
}

impl KubeScheduler {
    /// Creates a scheduler client from configuration. The service account
    /// token is read once at construction; a missing token file is allowed
    /// for clusters with anonymous auth (e.g., local dev).
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        let token = match std::fs::read_to_string(&config.token_path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                debug!("No service account token at {}: {}", config.token_path, e);
                None
            }
        };

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| SchedulerError::transport(e.to_string()))?;

        Ok(Self {
            client,
            api_server: config.api_server.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{namespace}/pods", self.api_server)
    }

    fn services_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{namespace}/services", self.api_server)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Maps a response to success, `NotFound`, or an API error carrying the
    /// apiserver's diagnostic message.
    async fn check(resp: reqwest::Response, name: &str) -> Result<reqwest::Response, SchedulerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SchedulerError::not_found(name));
        }
        let message = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable response body>".to_string());
        Err(SchedulerError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl Scheduler for KubeScheduler {
    async fn create_workload(
        &self,
        namespace: &str,
        manifest: &WorkloadManifest,
    ) -> Result<(), SchedulerError> {
        let name = manifest.metadata.name.clone();
        debug!("Creating workload {name} in namespace {namespace}");
        let resp = self
            .authed(self.client.post(self.pods_url(namespace)))
            .json(manifest)
            .send()
            .await
            .map_err(|e| SchedulerError::transport(e.to_string()))?;
        Self::check(resp, &name).await?;
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        debug!("Deleting workload {name} in namespace {namespace}");
        let url = format!("{}/{name}", self.pods_url(namespace));
        let resp = self
            .authed(self.client.delete(url))
            .send()
            .await
            .map_err(|e| SchedulerError::transport(e.to_string()))?;
        Self::check(resp, name).await?;
        Ok(())
    }

    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, SchedulerError> {
        let url = format!("{}/{name}", self.pods_url(namespace));
        let resp = self
            .authed(self.client.get(url))
            .send()
            .await
            .map_err(|e| SchedulerError::transport(e.to_string()))?;
        let resp = Self::check(resp, name).await?;
        let pod: PodObject = resp
            .json()
            .await
            .map_err(|e| SchedulerError::transport(format!("malformed pod object: {e}")))?;
        Ok(pod.into_status(name))
    }

    async fn create_service(
        &self,
        namespace: &str,
        manifest: &ServiceManifest,
    ) -> Result<(), SchedulerError> {
        let name = manifest.metadata.name.clone();
        debug!("Creating service {name} in namespace {namespace}");
        let resp = self
            .authed(self.client.post(self.services_url(namespace)))
            .json(manifest)
            .send()
            .await
            .map_err(|e| SchedulerError::transport(e.to_string()))?;
        Self::check(resp, &name).await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), SchedulerError> {
        debug!("Deleting service {name} in namespace {namespace}");
        let url = format!("{}/{name}", self.services_url(namespace));
        let resp = self
            .authed(self.client.delete(url))
            .send()
            .await
            .map_err(|e| SchedulerError::transport(e.to_string()))?;
        Self::check(resp, name).await?;
        Ok(())
    }

    fn endpoint_url(&self, namespace: &str, service: &str, port: u16) -> String {
        format!("http://{service}.{namespace}.svc.cluster.local:{port}")
    }
}

// Read-side subset of the pod object. Everything is optional: a pod that
// was just created may have an empty status block.
#[derive(Debug, Deserialize)]
struct PodObject {
    #[serde(default)]
    status: PodStatusObject,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatusObject {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<PodCondition>,
    #[serde(default)]
    container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodCondition {
    #[serde(rename = "type")]
    condition_type: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerStatus {
    #[serde(default)]
    restart_count: u32,
}

impl PodObject {
    fn into_status(self, name: &str) -> WorkloadStatus {
        let ready = self
            .status
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True");
        let phase = self
            .status
            .phase
            .as_deref()
            .map_or(WorkloadPhase::Unknown, WorkloadPhase::parse);
        if phase == WorkloadPhase::Unknown && self.status.phase.is_some() {
            warn!(
                "Unrecognized workload phase {:?} for {name}",
                self.status.phase
            );
        }
        WorkloadStatus {
            name: name.to_string(),
            phase,
            ready,
            restarts: self
                .status
                .container_statuses
                .first()
                .map_or(0, |c| c.restart_count),
            started_at: self.status.start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_uses_cluster_dns() {
        let scheduler = KubeScheduler::new(&SchedulerConfig {
            api_server: "https://kubernetes.default.svc".to_string(),
            token_path: "/nonexistent".to_string(),
            insecure_skip_tls_verify: false,
        })
        .unwrap();
        assert_eq!(
            scheduler.endpoint_url("default", "code-sandbox-abc123", 8080),
            "http://code-sandbox-abc123.default.svc.cluster.local:8080"
        );
    }

    #[test]
    fn test_api_server_trailing_slash_trimmed() {
        let scheduler = KubeScheduler::new(&SchedulerConfig {
            api_server: "https://127.0.0.1:6443/".to_string(),
            token_path: "/nonexistent".to_string(),
            insecure_skip_tls_verify: true,
        })
        .unwrap();
        assert_eq!(
            scheduler.pods_url("default"),
            "https://127.0.0.1:6443/api/v1/namespaces/default/pods"
        );
        assert_eq!(
            scheduler.services_url("sandboxes"),
            "https://127.0.0.1:6443/api/v1/namespaces/sandboxes/services"
        );
    }

    #[test]
    fn test_pod_object_parsing() {
        let json = r#"{
            "status": {
                "phase": "Running",
                "conditions": [
                    {"type": "PodScheduled", "status": "True"},
                    {"type": "Ready", "status": "True"}
                ],
                "containerStatuses": [{"restartCount": 2}],
                "startTime": "2026-08-30T12:00:00Z"
            }
        }"#;
        let pod: PodObject = serde_json::from_str(json).unwrap();
        let status = pod.into_status("code-sandbox-abc123");
        assert_eq!(status.phase, WorkloadPhase::Running);
        assert!(status.ready);
        assert_eq!(status.restarts, 2);
        assert!(status.started_at.is_some());
    }

    #[test]
    fn test_pod_object_with_empty_status() {
        let pod: PodObject = serde_json::from_str("{}").unwrap();
        let status = pod.into_status("code-sandbox-abc123");
        assert_eq!(status.phase, WorkloadPhase::Unknown);
        assert!(!status.ready);
        assert_eq!(status.restarts, 0);
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_not_ready_condition() {
        let json = r#"{
            "status": {
                "phase": "Pending",
                "conditions": [{"type": "Ready", "status": "False"}]
            }
        }"#;
        let pod: PodObject = serde_json::from_str(json).unwrap();
        let status = pod.into_status("w");
        assert_eq!(status.phase, WorkloadPhase::Pending);
        assert!(!status.ready);
    }
}
