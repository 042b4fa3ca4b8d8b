//! Deployer-facing manifest wire shapes.
//!
//! Two shapes share one document type: v1 declares a single service at
//! the top level; v2 adds a `services` map (top-level fields become
//! per-service defaults) plus inter-service links. Both carry the
//! schema marker and an integer version discriminator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use berth_core::ChainNetwork;

/// Schema marker every accepted manifest must carry.
pub const SCHEMA: &str = "berth/deploy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub schema: String,
    pub version: u32,
    /// Top-level service fields. For v1 this is the service; for v2
    /// these are defaults merged under every named service.
    #[serde(flatten)]
    pub defaults: ServiceFields,
    /// v2 only: named services. Exactly one is selected per deployment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceFields>,
    /// v2 only: declared inter-service links.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<ServiceLink>,
    /// Which tenants/networks this manifest authorizes deploying to.
    #[serde(default)]
    pub targets: Vec<DeployTarget>,
}

/// Per-service manifest fields. Everything is optional so that v2
/// services can merge over document-level defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFields {
    /// Pre-built image reference; used as-is, nothing is built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// User-supplied build descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildFields>,
    /// Named build template ("identity-agent").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Declared runtime ("node", "python", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceFields>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<DatabaseFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendFields>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFields {
    /// Path of the Dockerfile inside the uploaded artifact.
    pub dockerfile: String,
    /// Build context directory, relative to the artifact root.
    /// Defaults to the artifact root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub tee: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFields {
    pub path: String,
    /// Port to probe. Defaults to the first declared port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFields {
    pub size_gb: u32,
    /// Mount path inside the agent container.
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatabaseFields {
    #[serde(default)]
    pub mysql: bool,
    #[serde(default)]
    pub mongo: bool,
    #[serde(default)]
    pub redis: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendFields {
    /// Pre-built frontend image; used as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Static bundle directory inside the artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Single-page app: unresolved paths fall back to index.html.
    #[serde(default)]
    pub spa: bool,
}

/// A declared link between two named services (v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLink {
    pub from: String,
    pub to: String,
}

/// A tenant/network pair this manifest authorizes deploying to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    pub project: String,
    pub network: ChainNetwork,
}

impl ServiceFields {
    /// Merge `self` (a named service) over document-level defaults.
    /// Whole fields win on the service side; env merges key-wise with
    /// the service value winning on collision.
    pub fn merged_over(&self, defaults: &ServiceFields) -> ServiceFields {
        let mut env = defaults.env.clone();
        for (k, v) in &self.env {
            env.insert(k.clone(), v.clone());
        }
        ServiceFields {
            image: self.image.clone().or_else(|| defaults.image.clone()),
            build: self.build.clone().or_else(|| defaults.build.clone()),
            template: self.template.clone().or_else(|| defaults.template.clone()),
            runtime: self.runtime.clone().or_else(|| defaults.runtime.clone()),
            env,
            resources: self.resources.clone().or_else(|| defaults.resources.clone()),
            ports: if self.ports.is_empty() {
                defaults.ports.clone()
            } else {
                self.ports.clone()
            },
            health: self.health.clone().or_else(|| defaults.health.clone()),
            storage: self.storage.clone().or_else(|| defaults.storage.clone()),
            databases: self.databases.or(defaults.databases),
            frontend: self.frontend.clone().or_else(|| defaults.frontend.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_manifest_parses_from_json() {
        let doc: ManifestDocument = serde_json::from_str(
            r#"{
                "schema": "berth/deploy",
                "version": 1,
                "runtime": "node",
                "ports": [8080],
                "env": {"LOG_LEVEL": "info"},
                "targets": [{"project": "proj-1", "network": "mutinynet"}]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.schema, SCHEMA);
        assert_eq!(doc.version, 1);
        assert!(doc.services.is_empty());
        assert_eq!(doc.defaults.ports, vec![8080]);
    }

    #[test]
    fn v2_manifest_parses_services_and_links() {
        let doc: ManifestDocument = serde_json::from_str(
            r#"{
                "schema": "berth/deploy",
                "version": 2,
                "env": {"SHARED": "1"},
                "services": {
                    "api": {"runtime": "python", "ports": [9000]},
                    "worker": {"runtime": "node"}
                },
                "links": [{"from": "api", "to": "worker"}],
                "targets": []
            }"#,
        )
        .unwrap();
        assert_eq!(doc.services.len(), 2);
        assert_eq!(doc.links.len(), 1);
    }

    #[test]
    fn service_merge_prefers_service_values() {
        let mut defaults = ServiceFields::default();
        defaults.runtime = Some("node".to_string());
        defaults.ports = vec![3000];
        defaults.env.insert("A".to_string(), "default".to_string());
        defaults.env.insert("B".to_string(), "kept".to_string());

        let mut service = ServiceFields::default();
        service.ports = vec![8080];
        service.env.insert("A".to_string(), "service".to_string());

        let merged = service.merged_over(&defaults);
        assert_eq!(merged.runtime.as_deref(), Some("node"));
        assert_eq!(merged.ports, vec![8080]);
        assert_eq!(merged.env.get("A").unwrap(), "service");
        assert_eq!(merged.env.get("B").unwrap(), "kept");
    }
}
