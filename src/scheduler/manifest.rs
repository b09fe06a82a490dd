//! Typed workload and service manifests.
//!
//! A minimal, serde-serializable subset of the Kubernetes core/v1 Pod and
//! Service objects — just the fields the sandbox needs. Keeping these as
//! structs (rather than raw JSON) lets the hardening invariants be asserted
//! in unit tests.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{Config, ResourceConfig};
use crate::session::SandboxSession;

const APP_LABEL: &str = "code-sandbox";
const SANDBOX_UID: u32 = 1000;

/// Pod manifest for one sandbox workload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: WorkloadSpec,
}

/// Service manifest routing traffic to one sandbox workload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub restart_policy: String,
    pub security_context: PodSecurityContext,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityContext {
    pub run_as_non_root: bool,
    pub run_as_user: u32,
    pub fs_group: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub resources: Resources,
    pub security_context: ContainerSecurityContext,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
    pub ports: Vec<ContainerPort>,
    pub liveness_probe: Probe,
    pub readiness_probe: Probe,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resources {
    pub limits: BTreeMap<String, String>,
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSecurityContext {
    pub allow_privilege_escalation: bool,
    pub read_only_root_filesystem: bool,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub container_port: u16,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    pub http_get: HttpGetAction,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpGetAction {
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub empty_dir: EmptyDir,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDir {
    pub size_limit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Toleration {
    pub key: String,
    pub operator: String,
    pub value: String,
    pub effect: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSpec {
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type")]
    pub service_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub port: u16,
    pub target_port: u16,
    pub name: String,
}

fn session_labels(session: &SandboxSession) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), APP_LABEL.to_string()),
        ("session".to_string(), session.session_id().to_string()),
    ])
}

fn resource_limits(resources: &ResourceConfig) -> Resources {
    Resources {
        limits: BTreeMap::from([
            ("memory".to_string(), resources.memory_limit.clone()),
            ("cpu".to_string(), resources.cpu_limit.clone()),
            (
                "ephemeral-storage".to_string(),
                resources.ephemeral_storage_limit.clone(),
            ),
        ]),
        requests: BTreeMap::from([
            ("memory".to_string(), resources.memory_request.clone()),
            ("cpu".to_string(), resources.cpu_request.clone()),
        ]),
    }
}

/// Builds the hardened pod manifest for a session.
pub fn workload_manifest(config: &Config, session: &SandboxSession) -> WorkloadManifest {
    let port = config.sandbox.port;
    let mut labels = session_labels(session);
    labels.insert("component".to_string(), "code-executor".to_string());

    WorkloadManifest {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        metadata: Metadata {
            name: session.workload_name().to_string(),
            labels,
        },
        spec: WorkloadSpec {
            restart_policy: "Never".to_string(),
            security_context: PodSecurityContext {
                run_as_non_root: true,
                run_as_user: SANDBOX_UID,
                fs_group: SANDBOX_UID,
            },
            containers: vec![Container {
                name: APP_LABEL.to_string(),
                image: config.sandbox.image.clone(),
                resources: resource_limits(&config.resources),
                security_context: ContainerSecurityContext {
                    allow_privilege_escalation: false,
                    read_only_root_filesystem: false,
                    capabilities: Capabilities {
                        drop: vec!["ALL".to_string()],
                    },
                },
                env: vec![EnvVar {
                    name: "SESSION_ID".to_string(),
                    value: session.session_id().to_string(),
                }],
                volume_mounts: vec![
                    VolumeMount {
                        name: "temp-volume".to_string(),
                        mount_path: "/tmp".to_string(),
                    },
                    VolumeMount {
                        name: "workspace".to_string(),
                        mount_path: "/workspace".to_string(),
                    },
                ],
                ports: vec![ContainerPort {
                    container_port: port,
                    name: "api".to_string(),
                }],
                liveness_probe: Probe {
                    http_get: HttpGetAction {
                        path: "/health".to_string(),
                        port,
                    },
                    initial_delay_seconds: 5,
                    period_seconds: 10,
                    failure_threshold: 3,
                },
                readiness_probe: Probe {
                    http_get: HttpGetAction {
                        path: "/ready".to_string(),
                        port,
                    },
                    initial_delay_seconds: 2,
                    period_seconds: 5,
                    failure_threshold: 3,
                },
            }],
            volumes: vec![
                Volume {
                    name: "temp-volume".to_string(),
                    empty_dir: EmptyDir {
                        size_limit: "100Mi".to_string(),
                    },
                },
                Volume {
                    name: "workspace".to_string(),
                    empty_dir: EmptyDir {
                        size_limit: "500Mi".to_string(),
                    },
                },
            ],
            node_selector: BTreeMap::from([(
                "workload-type".to_string(),
                "sandbox".to_string(),
            )]),
            tolerations: vec![Toleration {
                key: "sandbox".to_string(),
                operator: "Equal".to_string(),
                value: "true".to_string(),
                effect: "NoSchedule".to_string(),
            }],
        },
    }
}

/// Builds the cluster-internal service selecting the session's workload.
pub fn service_manifest(config: &Config, session: &SandboxSession) -> ServiceManifest {
    let port = config.sandbox.port;
    ServiceManifest {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        metadata: Metadata {
            name: session.service_name().to_string(),
            labels: session_labels(session),
        },
        spec: ServiceSpec {
            selector: session_labels(session),
            ports: vec![ServicePort {
                port,
                target_port: port,
                name: "api".to_string(),
            }],
            service_type: "ClusterIP".to_string(),
        },
    }
}
