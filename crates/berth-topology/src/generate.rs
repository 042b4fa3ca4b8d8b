//! The topology compiler.
//!
//! `generate` is a pure function from (service spec, project, images,
//! node parameters) to the ordered resource set. Identical inputs
//! always yield an identical topology — resource order is fixed and
//! every map is ordered.

use std::collections::BTreeMap;

use thiserror::Error;

use berth_core::{names, Project};
use berth_manifest::{FrontendSpec, ServiceSpec};

use crate::names as resource_names;
use crate::resources::*;

/// Node-level inputs to topology generation.
#[derive(Debug, Clone)]
pub struct TopologyParams {
    pub base_domain: String,
    /// Volume claim size for stateful database workloads, in GiB.
    pub database_volume_gb: u32,
}

/// Images resolved by the build pipeline for this deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadImages {
    pub agent: String,
    pub frontend: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("spec declares a frontend but no frontend image was built")]
    MissingFrontendImage,
}

const SCALE_MIN: u32 = 1;
const SCALE_MAX: u32 = 10;
const SCALE_CPU_PCT: u32 = 80;
const READINESS_DELAY_SECS: u64 = 10;
const LIVENESS_DELAY_SECS: u64 = 60;
const GPU_CLASS: &str = "gpu-standard";
const GPU_TOLERATION: &str = "berth.host/gpu";

/// Compile the full resource set for one tenant.
pub fn generate(
    spec: &ServiceSpec,
    project: &Project,
    images: &WorkloadImages,
    params: &TopologyParams,
) -> Result<Topology, TopologyError> {
    let pid = project.id.as_str();
    let namespace = names::project_namespace(pid);
    let mut resources = Vec::new();

    resources.push(Resource::Workload(workload(spec, project, images)?));
    resources.push(Resource::Autoscaler(autoscaler(spec, pid, &namespace)));
    resources.push(Resource::Service(service(spec, pid, &namespace)));
    resources.push(Resource::Ingress(ingress(spec, project, params)));

    if let Some(storage) = &spec.storage {
        resources.push(Resource::VolumeClaim(VolumeClaim {
            name: resource_names::agent_claim_name(pid),
            namespace: namespace.clone(),
            size_gb: storage.size_gb,
        }));
    }

    for engine in declared_databases(spec) {
        let claim = engine.stateful().then(|| {
            resource_names::database_claim_name(pid, engine.as_str())
        });
        if let Some(claim_name) = &claim {
            resources.push(Resource::VolumeClaim(VolumeClaim {
                name: claim_name.clone(),
                namespace: namespace.clone(),
                size_gb: params.database_volume_gb,
            }));
        }
        resources.push(Resource::StatefulService(StatefulService {
            name: resource_names::database_name(pid, engine.as_str()),
            namespace: namespace.clone(),
            engine,
            image: engine.image().to_string(),
            port: engine.port(),
            volume: claim,
        }));
    }

    Ok(Topology {
        release: names::release_name(pid),
        namespace,
        resources,
    })
}

/// Compile only the ingress resources for a tenant. Used by the
/// billing gate to restore reachability without a full re-deploy.
pub fn generate_ingresses(
    spec: &ServiceSpec,
    project: &Project,
    params: &TopologyParams,
) -> Vec<Resource> {
    vec![Resource::Ingress(ingress(spec, project, params))]
}

fn workload(
    spec: &ServiceSpec,
    project: &Project,
    images: &WorkloadImages,
) -> Result<Workload, TopologyError> {
    let pid = project.id.as_str();
    let mut containers = vec![agent_container(spec, project, &images.agent)];

    if spec.frontend.is_some() {
        let image = match &spec.frontend {
            Some(FrontendSpec::Prebuilt { image }) => image.clone(),
            _ => images
                .frontend
                .clone()
                .ok_or(TopologyError::MissingFrontendImage)?,
        };
        containers.push(Container {
            name: "frontend".to_string(),
            image,
            env: BTreeMap::new(),
            ports: vec![80],
            resources: ContainerResources {
                cpu_millis: 100,
                memory_mb: 128,
                gpu: false,
            },
            liveness: None,
            readiness: None,
        });
    }

    Ok(Workload {
        name: resource_names::workload_name(pid),
        namespace: names::project_namespace(pid),
        labels: resource_names::selector_labels(pid),
        containers,
        volume: spec.storage.as_ref().map(|s| VolumeMount {
            claim: resource_names::agent_claim_name(pid),
            mount_path: s.mount_path.clone(),
        }),
        gpu: spec.resources.gpu.then(|| GpuScheduling {
            class: GPU_CLASS.to_string(),
            toleration: GPU_TOLERATION.to_string(),
        }),
    })
}

fn agent_container(spec: &ServiceSpec, project: &Project, image: &str) -> Container {
    // Manifest env is the base; tenant config overrides win on
    // collision; funding variables only when funding is required.
    let mut env = spec.env.clone();
    for (k, v) in &project.config_overrides {
        env.insert(k.clone(), v.clone());
    }
    if project.funding_required {
        if let Some(key) = &project.funding_key {
            env.insert("FUNDING_KEY".to_string(), key.clone());
        }
        env.insert(
            "CHAIN_NETWORK".to_string(),
            project.network.as_str().to_string(),
        );
    }

    let (liveness, readiness) = match &spec.health {
        Some(h) => (
            Some(Probe {
                path: h.path.clone(),
                port: h.port,
                interval_secs: h.interval_secs,
                initial_delay_secs: LIVENESS_DELAY_SECS,
            }),
            Some(Probe {
                path: h.path.clone(),
                port: h.port,
                interval_secs: h.interval_secs,
                initial_delay_secs: READINESS_DELAY_SECS,
            }),
        ),
        None => (None, None),
    };

    Container {
        name: "agent".to_string(),
        image: image.to_string(),
        env,
        ports: spec.ports.clone(),
        resources: ContainerResources {
            cpu_millis: spec.resources.cpu_millis,
            memory_mb: spec.resources.memory_mb,
            gpu: spec.resources.gpu,
        },
        liveness,
        readiness,
    }
}

fn autoscaler(spec: &ServiceSpec, pid: &str, namespace: &str) -> Autoscaler {
    // GPU allocation is not overcommittable: cap at a single replica.
    let max_replicas = if spec.resources.gpu { 1 } else { SCALE_MAX };
    Autoscaler {
        name: resource_names::autoscaler_name(pid),
        namespace: namespace.to_string(),
        target: resource_names::workload_name(pid),
        min_replicas: SCALE_MIN,
        max_replicas,
        cpu_utilization_pct: SCALE_CPU_PCT,
    }
}

fn service(spec: &ServiceSpec, pid: &str, namespace: &str) -> ServiceResource {
    let mut ports: Vec<ServicePort> = spec
        .ports
        .iter()
        .map(|p| ServicePort {
            name: format!("agent-{p}"),
            port: *p,
        })
        .collect();
    if spec.frontend.is_some() {
        ports.push(ServicePort {
            name: "frontend".to_string(),
            port: 80,
        });
    }
    ServiceResource {
        name: resource_names::service_name(pid),
        namespace: namespace.to_string(),
        headless: true,
        selector: resource_names::selector_labels(pid),
        ports,
    }
}

fn ingress(spec: &ServiceSpec, project: &Project, params: &TopologyParams) -> Ingress {
    let pid = project.id.as_str();
    let svc = resource_names::service_name(pid);
    let agent_port = spec.primary_port();

    // Host order is fixed: generated agent, generated frontend,
    // verified custom agent, verified custom frontend plus www alias.
    let mut agent_hosts = vec![names::agent_hostname(pid, &params.base_domain)];
    let mut frontend_hosts = Vec::new();
    if spec.frontend.is_some() {
        frontend_hosts.push(names::frontend_hostname(pid, &params.base_domain));
    }
    if let Some(custom) = &project.custom_agent_domain {
        agent_hosts.push(custom.clone());
    }
    if let Some(custom) = &project.custom_frontend_domain {
        frontend_hosts.push(custom.clone());
        frontend_hosts.push(names::www_alias(custom));
    }

    let mut tls_hosts = agent_hosts.clone();
    tls_hosts.extend(frontend_hosts.iter().cloned());

    let mut rules: Vec<IngressRule> = agent_hosts
        .into_iter()
        .map(|host| IngressRule {
            host,
            service: svc.clone(),
            port: agent_port,
        })
        .collect();
    rules.extend(frontend_hosts.into_iter().map(|host| IngressRule {
        host,
        service: svc.clone(),
        port: 80,
    }));

    Ingress {
        name: resource_names::ingress_name(pid),
        namespace: names::project_namespace(pid),
        tls: IngressTls {
            hosts: tls_hosts,
            secret_name: resource_names::tls_secret_name(pid),
        },
        rules,
    }
}

fn declared_databases(spec: &ServiceSpec) -> Vec<DatabaseEngine> {
    let mut engines = Vec::new();
    if spec.databases.mysql {
        engines.push(DatabaseEngine::MySql);
    }
    if spec.databases.mongo {
        engines.push(DatabaseEngine::MongoDb);
    }
    if spec.databases.redis {
        engines.push(DatabaseEngine::Redis);
    }
    engines
}
