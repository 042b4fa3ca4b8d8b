//! Deterministic resource names and selector labels.
//!
//! Every resource name is a pure function of the project id so that
//! workload, service, autoscaler, and ingress selection always agree.

use std::collections::BTreeMap;

pub fn workload_name(project_id: &str) -> String {
    format!("agent-{project_id}")
}

pub fn service_name(project_id: &str) -> String {
    format!("agent-{project_id}-svc")
}

pub fn autoscaler_name(project_id: &str) -> String {
    format!("agent-{project_id}-hpa")
}

pub fn ingress_name(project_id: &str) -> String {
    format!("agent-{project_id}-ing")
}

pub fn tls_secret_name(project_id: &str) -> String {
    format!("agent-{project_id}-tls")
}

pub fn agent_claim_name(project_id: &str) -> String {
    format!("agent-{project_id}-data")
}

pub fn database_name(project_id: &str, engine: &str) -> String {
    format!("{engine}-{project_id}")
}

pub fn database_claim_name(project_id: &str, engine: &str) -> String {
    format!("{engine}-{project_id}-data")
}

/// Labels used both on the workload pod template and as the selector
/// of the service and autoscaler.
pub fn selector_labels(project_id: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), workload_name(project_id));
    labels.insert("berth/project".to_string(), project_id.to_string());
    labels
}
