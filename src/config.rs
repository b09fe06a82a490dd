//! Configuration loading for the sandbox orchestrator.
//!
//! Configuration lives in `podbox.toml` in the caller's working directory.
//! Every field has a default so a missing file yields a fully usable
//! configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILE: &str = "podbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// Sandbox session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Namespace the workload and service are created in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Container image hosting the execution endpoint.
    #[serde(default = "default_image")]
    pub image: String,

    /// Default per-execution timeout in seconds. Per-call timeouts are
    /// capped at this value.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Port the execution endpoint listens on inside the workload.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            image: default_image(),
            timeout_secs: default_timeout(),
            port: default_port(),
        }
    }
}

/// Resource limits applied to the sandbox workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "512Mi")
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    /// CPU limit (e.g., "500m")
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,

    /// Ephemeral storage limit (e.g., "1Gi")
    #[serde(default = "default_ephemeral_limit")]
    pub ephemeral_storage_limit: String,

    /// Memory request
    #[serde(default = "default_memory_request")]
    pub memory_request: String,

    /// CPU request
    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            ephemeral_storage_limit: default_ephemeral_limit(),
            memory_request: default_memory_request(),
            cpu_request: default_cpu_request(),
        }
    }
}

/// Kubernetes API access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// API server base URL. The in-cluster service DNS name by default.
    #[serde(default = "default_api_server")]
    pub api_server: String,

    /// Path to the service account bearer token.
    #[serde(default = "default_token_path")]
    pub token_path: String,

    /// Skip TLS certificate verification. Only for local development
    /// against clusters with self-signed certificates.
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            token_path: default_token_path(),
            insecure_skip_tls_verify: false,
        }
    }
}

/// Readiness polling configuration for workload startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Interval between readiness polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum number of polls before provisioning is abandoned.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

// Default value functions
fn default_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "podbox-sandbox:latest".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_port() -> u16 {
    8080
}

fn default_memory_limit() -> String {
    "512Mi".to_string()
}

fn default_cpu_limit() -> String {
    "500m".to_string()
}

fn default_ephemeral_limit() -> String {
    "1Gi".to_string()
}

fn default_memory_request() -> String {
    "256Mi".to_string()
}

fn default_cpu_request() -> String {
    "250m".to_string()
}

fn default_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_token_path() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_max_polls() -> u32 {
    60
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
