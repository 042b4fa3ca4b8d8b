//! Deterministic naming for tenant-scoped resources.
//!
//! Release name, namespace, and generated hostnames are pure functions
//! of the project id so that every apply targets the same release and
//! all resources agree on selectors.

/// Cluster namespace owned by a project.
pub fn project_namespace(project_id: &str) -> String {
    format!("tenant-{project_id}")
}

/// Release name for a project's single deployable unit.
pub fn release_name(project_id: &str) -> String {
    format!("agent-{project_id}")
}

/// Generated hostname for the agent under the node's base domain.
pub fn agent_hostname(project_id: &str, base_domain: &str) -> String {
    format!("{project_id}.{base_domain}")
}

/// Generated hostname for the frontend under the node's base domain.
pub fn frontend_hostname(project_id: &str, base_domain: &str) -> String {
    format!("{project_id}.app.{base_domain}")
}

/// `www.` alias for a verified custom frontend domain.
pub fn www_alias(hostname: &str) -> String {
    format!("www.{hostname}")
}
