//! Manifest compilation: raw document + selector → `ServiceSpec`.
//!
//! Validation order matters: schema first, then service selection,
//! then deployment targets, then node capability. Every failure is
//! terminal — no build step runs after a compile error.

use tracing::debug;

use berth_core::{ChainNetwork, NodeCapability};

use crate::error::{ManifestError, ManifestResult};
use crate::spec::*;
use crate::wire::{DatabaseFields, ManifestDocument, ServiceFields, SCHEMA};

/// Template name selecting the identity-agent build.
pub const IDENTITY_AGENT_TEMPLATE: &str = "identity-agent";

/// Service name assigned to v1 single-service manifests.
pub const DEFAULT_SERVICE: &str = "default";

pub fn compile(
    doc: &ManifestDocument,
    selector: Option<&str>,
    project_id: &str,
    network: ChainNetwork,
    capability: NodeCapability,
) -> ManifestResult<ServiceSpec> {
    if doc.schema != SCHEMA || !matches!(doc.version, 1 | 2) {
        return Err(ManifestError::SchemaMismatch {
            expected: SCHEMA,
            found: format!("{} v{}", doc.schema, doc.version),
        });
    }

    let (name, fields) = select_service(doc, selector)?;

    check_targets(doc, project_id, network)?;

    let resources = fields
        .resources
        .as_ref()
        .map(|r| Resources {
            cpu_millis: r.cpu_millis.unwrap_or_else(|| Resources::default().cpu_millis),
            memory_mb: r.memory_mb.unwrap_or_else(|| Resources::default().memory_mb),
            gpu: r.gpu,
            tee: r.tee,
        })
        .unwrap_or_default();

    if resources.gpu && !capability.gpu {
        return Err(ManifestError::UnsupportedResource("gpu"));
    }
    if resources.tee && !capability.tee {
        return Err(ManifestError::UnsupportedResource("tee"));
    }

    let build = resolve_build_method(&fields);
    let runtime = Runtime::parse(fields.runtime.as_deref());

    let health = fields.health.as_ref().map(|h| HealthCheck {
        path: h.path.clone(),
        port: h.port.or_else(|| fields.ports.first().copied()).unwrap_or(80),
        interval_secs: h.interval_secs.unwrap_or(30),
    });

    let frontend = fields.frontend.as_ref().map(|f| match &f.image {
        Some(image) => FrontendSpec::Prebuilt { image: image.clone() },
        None => FrontendSpec::StaticDir {
            dir: f.dir.clone().unwrap_or_else(|| "dist".to_string()),
            spa: f.spa,
        },
    });

    let storage = fields.storage.as_ref().map(|s| StorageSpec {
        size_gb: s.size_gb,
        mount_path: s.path.clone(),
    });

    let db = fields.databases.unwrap_or(DatabaseFields::default());

    debug!(service = %name, ?build, "manifest compiled");

    Ok(ServiceSpec {
        name,
        build,
        runtime,
        env: fields.env.clone(),
        resources,
        ports: fields.ports.clone(),
        health,
        frontend,
        storage,
        databases: DatabaseFlags {
            mysql: db.mysql,
            mongo: db.mongo,
            redis: db.redis,
        },
    })
}

/// Pick the effective service: v1 uses the top-level fields, v2
/// requires a selector naming an entry in `services`.
fn select_service(
    doc: &ManifestDocument,
    selector: Option<&str>,
) -> ManifestResult<(String, ServiceFields)> {
    if doc.version == 1 {
        return Ok((DEFAULT_SERVICE.to_string(), doc.defaults.clone()));
    }
    let name = selector.ok_or(ManifestError::MissingServiceSelector)?;
    let service = doc
        .services
        .get(name)
        .ok_or_else(|| ManifestError::UnknownService(name.to_string()))?;
    Ok((name.to_string(), service.merged_over(&doc.defaults)))
}

/// At least one declared target must name the tenant being deployed,
/// on its network. A matching id on the wrong network is a distinct
/// error from no match at all.
fn check_targets(
    doc: &ManifestDocument,
    project_id: &str,
    network: ChainNetwork,
) -> ManifestResult<()> {
    let mut wrong_network = None;
    for target in &doc.targets {
        if target.project == project_id {
            if target.network == network {
                return Ok(());
            }
            wrong_network = Some(target.network);
        }
    }
    match wrong_network {
        Some(declared) => Err(ManifestError::NetworkMismatch {
            declared: declared.as_str().to_string(),
            node: network.as_str().to_string(),
        }),
        None => Err(ManifestError::NoMatchingTarget),
    }
}

/// Resolution order: pre-built image, user Dockerfile, identity-agent
/// template, then runtime synthesis.
fn resolve_build_method(fields: &ServiceFields) -> BuildMethod {
    if let Some(image) = &fields.image {
        return BuildMethod::Prebuilt { image: image.clone() };
    }
    if let Some(build) = &fields.build {
        return BuildMethod::Dockerfile {
            dockerfile: build.dockerfile.clone(),
            context: build.context.clone(),
        };
    }
    if fields.template.as_deref() == Some(IDENTITY_AGENT_TEMPLATE) {
        return BuildMethod::IdentityAgent;
    }
    BuildMethod::FromRuntime
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DeployTarget, ResourceFields};

    fn node_capability() -> NodeCapability {
        NodeCapability { gpu: false, tee: false }
    }

    fn v1_doc() -> ManifestDocument {
        serde_json::from_str(
            r#"{
                "schema": "berth/deploy",
                "version": 1,
                "runtime": "node",
                "ports": [8080],
                "targets": [{"project": "node-1", "network": "mutinynet"}]
            }"#,
        )
        .unwrap()
    }

    fn v2_doc() -> ManifestDocument {
        serde_json::from_str(
            r#"{
                "schema": "berth/deploy",
                "version": 2,
                "env": {"SHARED": "1"},
                "services": {
                    "api": {"runtime": "python", "ports": [9000]}
                },
                "targets": [{"project": "node-1", "network": "mutinynet"}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn v1_compiles_without_selector() {
        let spec = compile(&v1_doc(), None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap();
        assert_eq!(spec.name, "default");
        assert_eq!(spec.runtime, Runtime::Node);
        assert_eq!(spec.build, BuildMethod::FromRuntime);
        assert_eq!(spec.primary_port(), 8080);
    }

    #[test]
    fn bad_schema_marker_is_rejected() {
        let mut doc = v1_doc();
        doc.schema = "something/else".to_string();
        let err = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert!(matches!(err, ManifestError::SchemaMismatch { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut doc = v1_doc();
        doc.version = 3;
        let err = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert!(matches!(err, ManifestError::SchemaMismatch { .. }));
    }

    #[test]
    fn v2_requires_selector() {
        let err = compile(&v2_doc(), None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert_eq!(err, ManifestError::MissingServiceSelector);
    }

    #[test]
    fn v2_unknown_service_is_rejected() {
        let err = compile(
            &v2_doc(),
            Some("worker"),
            "node-1",
            ChainNetwork::Mutinynet,
            node_capability(),
        )
        .unwrap_err();
        assert_eq!(err, ManifestError::UnknownService("worker".to_string()));
    }

    #[test]
    fn v2_merges_defaults_under_service() {
        let spec = compile(
            &v2_doc(),
            Some("api"),
            "node-1",
            ChainNetwork::Mutinynet,
            node_capability(),
        )
        .unwrap();
        assert_eq!(spec.name, "api");
        assert_eq!(spec.runtime, Runtime::Python);
        assert_eq!(spec.env.get("SHARED").unwrap(), "1");
        assert_eq!(spec.ports, vec![9000]);
    }

    #[test]
    fn wrong_network_is_distinct_from_no_target() {
        let err = compile(&v1_doc(), None, "node-1", ChainNetwork::Mainnet, node_capability())
            .unwrap_err();
        assert!(matches!(err, ManifestError::NetworkMismatch { .. }));

        let err = compile(&v1_doc(), None, "other-node", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert_eq!(err, ManifestError::NoMatchingTarget);
    }

    #[test]
    fn gpu_request_needs_gpu_capability() {
        let mut doc = v1_doc();
        doc.defaults.resources = Some(ResourceFields {
            gpu: true,
            ..Default::default()
        });
        let err = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert_eq!(err, ManifestError::UnsupportedResource("gpu"));

        let spec = compile(
            &doc,
            None,
            "node-1",
            ChainNetwork::Mutinynet,
            NodeCapability { gpu: true, tee: false },
        )
        .unwrap();
        assert!(spec.resources.gpu);
    }

    #[test]
    fn tee_request_needs_tee_capability() {
        let mut doc = v1_doc();
        doc.defaults.resources = Some(ResourceFields {
            tee: true,
            ..Default::default()
        });
        let err = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert_eq!(err, ManifestError::UnsupportedResource("tee"));
    }

    #[test]
    fn build_method_resolution_order() {
        let mut doc = v1_doc();
        doc.defaults.template = Some(IDENTITY_AGENT_TEMPLATE.to_string());
        let spec = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap();
        assert_eq!(spec.build, BuildMethod::IdentityAgent);

        doc.defaults.image = Some("registry.example/app:1".to_string());
        let spec = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap();
        assert!(matches!(spec.build, BuildMethod::Prebuilt { .. }));
    }

    #[test]
    fn health_defaults_port_and_interval() {
        let mut doc = v1_doc();
        doc.defaults.health = Some(crate::wire::HealthFields {
            path: "/health".to_string(),
            port: None,
            interval_secs: None,
        });
        let spec = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap();
        let health = spec.health.unwrap();
        assert_eq!(health.port, 8080);
        assert_eq!(health.interval_secs, 30);
    }

    #[test]
    fn targets_are_checked_before_capability() {
        // A GPU manifest aimed at another node fails on targets, not
        // on capability.
        let mut doc = v1_doc();
        doc.targets = vec![DeployTarget {
            project: "other".to_string(),
            network: ChainNetwork::Mutinynet,
        }];
        doc.defaults.resources = Some(ResourceFields {
            gpu: true,
            ..Default::default()
        });
        let err = compile(&doc, None, "node-1", ChainNetwork::Mutinynet, node_capability())
            .unwrap_err();
        assert_eq!(err, ManifestError::NoMatchingTarget);
    }
}
