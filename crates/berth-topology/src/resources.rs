//! Typed cluster resource documents.
//!
//! These are the units the release manager applies. Untrusted manifest
//! fields (env values, hostnames) are carried as data and serialized
//! through serde, never interpolated into text templates. Maps are
//! `BTreeMap` so serialization order is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One resource in a topology, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resource {
    Workload(Workload),
    Autoscaler(Autoscaler),
    Service(ServiceResource),
    Ingress(Ingress),
    VolumeClaim(VolumeClaim),
    StatefulService(StatefulService),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Workload(_) => "workload",
            Resource::Autoscaler(_) => "autoscaler",
            Resource::Service(_) => "service",
            Resource::Ingress(_) => "ingress",
            Resource::VolumeClaim(_) => "volume_claim",
            Resource::StatefulService(_) => "stateful_service",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Workload(r) => &r.name,
            Resource::Autoscaler(r) => &r.name,
            Resource::Service(r) => &r.name,
            Resource::Ingress(r) => &r.name,
            Resource::VolumeClaim(r) => &r.name,
            Resource::StatefulService(r) => &r.name,
        }
    }
}

/// The full derived resource set for one tenant, recomputed on every
/// apply and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub release: String,
    pub namespace: String,
    pub resources: Vec<Resource>,
}

impl Topology {
    /// Canonical serialized form; identical inputs must yield
    /// byte-identical output.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn resources_of_kind(&self, kind: &str) -> Vec<&Resource> {
        self.resources.iter().filter(|r| r.kind() == kind).collect()
    }
}

// ── Workload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
    /// Claim mounted into the agent container, if storage is declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeMount>,
    /// GPU scheduling class and toleration, present only when a GPU is
    /// requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuScheduling>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<u16>,
    pub resources: ContainerResources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<Probe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<Probe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub cpu_millis: u32,
    pub memory_mb: u32,
    pub gpu: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub path: String,
    pub port: u16,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub claim: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuScheduling {
    /// Scheduling class selecting GPU-capable machines.
    pub class: String,
    /// Matching toleration key.
    pub toleration: String,
}

// ── Autoscaler ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Autoscaler {
    pub name: String,
    pub namespace: String,
    /// Workload this autoscaler targets.
    pub target: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub cpu_utilization_pct: u32,
}

// ── Service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResource {
    pub name: String,
    pub namespace: String,
    pub headless: bool,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

// ── Ingress ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingress {
    pub name: String,
    pub namespace: String,
    pub tls: IngressTls,
    pub rules: Vec<IngressRule>,
}

/// One TLS certificate spanning every known hostname for the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTls {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub service: String,
    pub port: u16,
}

// ── Storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeClaim {
    pub name: String,
    pub namespace: String,
    pub size_gb: u32,
}

// ── Databases ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    MySql,
    MongoDb,
    Redis,
}

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::MySql => "mysql",
            DatabaseEngine::MongoDb => "mongo",
            DatabaseEngine::Redis => "redis",
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            DatabaseEngine::MySql => "mysql:8",
            DatabaseEngine::MongoDb => "mongo:7",
            DatabaseEngine::Redis => "redis:7",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            DatabaseEngine::MySql => 3306,
            DatabaseEngine::MongoDb => 27017,
            DatabaseEngine::Redis => 6379,
        }
    }

    /// Stateful engines carry their own volume claim; redis does not.
    pub fn stateful(&self) -> bool {
        !matches!(self, DatabaseEngine::Redis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatefulService {
    pub name: String,
    pub namespace: String,
    pub engine: DatabaseEngine,
    pub image: String,
    pub port: u16,
    /// Claim backing this workload, when the engine is stateful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
}
