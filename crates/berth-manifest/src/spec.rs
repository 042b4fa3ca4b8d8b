//! Normalized single-service specification.
//!
//! Output of manifest compilation; input to the build pipeline and the
//! topology generator. One `ServiceSpec` per deployment, regardless of
//! which wire shape the deployer submitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Selected service name ("default" for v1 manifests).
    pub name: String,
    pub build: BuildMethod,
    pub runtime: Runtime,
    pub env: BTreeMap<String, String>,
    pub resources: Resources,
    /// Declared agent ports, in manifest order. The first one is the
    /// primary port routed by the ingress.
    pub ports: Vec<u16>,
    pub health: Option<HealthCheck>,
    pub frontend: Option<FrontendSpec>,
    pub storage: Option<StorageSpec>,
    pub databases: DatabaseFlags,
}

/// How the agent image is produced, in resolution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BuildMethod {
    /// Pre-built image reference; no build step.
    Prebuilt { image: String },
    /// User-supplied Dockerfile inside the artifact.
    Dockerfile { dockerfile: String, context: Option<String> },
    /// Specialized template for identity-agent workloads.
    IdentityAgent,
    /// Dockerfile synthesized from the declared runtime.
    FromRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    /// Script runtime (node).
    Node,
    /// Managed runtime (python).
    Python,
    /// Generic passthrough: the artifact ships its own entrypoint.
    Generic,
}

impl Runtime {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("node") | Some("javascript") => Runtime::Node,
            Some("python") => Runtime::Python,
            _ => Runtime::Generic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_millis: u32,
    pub memory_mb: u32,
    pub gpu: bool,
    pub tee: bool,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu_millis: 500,
            memory_mb: 512,
            gpu: false,
            tee: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FrontendSpec {
    /// Pre-built frontend image.
    Prebuilt { image: String },
    /// Static bundle served by a synthesized static-file-server image.
    StaticDir { dir: String, spa: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpec {
    pub size_gb: u32,
    pub mount_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFlags {
    pub mysql: bool,
    pub mongo: bool,
    pub redis: bool,
}

impl DatabaseFlags {
    pub fn any(&self) -> bool {
        self.mysql || self.mongo || self.redis
    }
}

impl ServiceSpec {
    /// Primary agent port routed by the ingress.
    pub fn primary_port(&self) -> u16 {
        self.ports.first().copied().unwrap_or(80)
    }
}
