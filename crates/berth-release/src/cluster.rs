//! Cluster backend seam.
//!
//! `apply_release` is atomic install-or-upgrade with automatic
//! rollback on failure; partially applied releases never survive.
//! Production wires an HTTP implementation in the daemon; tests use
//! [`RecordingCluster`].

use std::sync::Mutex;

use async_trait::async_trait;

use berth_topology::{Resource, Topology};

/// Failure of a cluster operation, with captured output.
#[derive(Debug, Clone)]
pub struct ClusterFailure {
    pub message: String,
    pub log: String,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Install or upgrade the release atomically. On failure the
    /// backend rolls back to the previous revision before returning.
    async fn apply_release(&self, topology: &Topology) -> Result<(), ClusterFailure>;

    /// Block until the release's workloads report ready, bounded by
    /// `timeout_secs`. Timeout is a failure.
    async fn wait_rollout(
        &self,
        namespace: &str,
        release: &str,
        timeout_secs: u64,
    ) -> Result<(), ClusterFailure>;

    /// Apply a standalone resource subset into an existing namespace.
    async fn apply_resources(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<(), ClusterFailure>;

    /// Remove a single ingress object, leaving the rest of the
    /// release untouched.
    async fn remove_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterFailure>;

    /// Delete a tenant namespace and everything in it.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), ClusterFailure>;
}

/// One recorded cluster operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOp {
    ApplyRelease {
        release: String,
        namespace: String,
        /// Canonical JSON of the applied topology.
        document: String,
    },
    WaitRollout { release: String },
    ApplyResources { namespace: String, kinds: Vec<String> },
    RemoveIngress { namespace: String, name: String },
    DeleteNamespace { namespace: String },
}

/// In-memory cluster for tests: records every operation and optionally
/// fails a chosen one.
#[derive(Default)]
pub struct RecordingCluster {
    ops: Mutex<Vec<ClusterOp>>,
    fail_apply: bool,
    fail_rollout: bool,
}

impl RecordingCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_apply() -> Self {
        Self { fail_apply: true, ..Self::default() }
    }

    pub fn failing_rollout() -> Self {
        Self { fail_rollout: true, ..Self::default() }
    }

    pub fn ops(&self) -> Vec<ClusterOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Canonical documents from every recorded `ApplyRelease`.
    pub fn applied_documents(&self) -> Vec<String> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                ClusterOp::ApplyRelease { document, .. } => Some(document.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ClusterClient for RecordingCluster {
    async fn apply_release(&self, topology: &Topology) -> Result<(), ClusterFailure> {
        if self.fail_apply {
            return Err(ClusterFailure {
                message: "release apply failed, rolled back".to_string(),
                log: "workload agent: image pull backoff".to_string(),
            });
        }
        let document = topology.to_canonical_json().map_err(|e| ClusterFailure {
            message: e.to_string(),
            log: String::new(),
        })?;
        self.ops.lock().unwrap().push(ClusterOp::ApplyRelease {
            release: topology.release.clone(),
            namespace: topology.namespace.clone(),
            document,
        });
        Ok(())
    }

    async fn wait_rollout(
        &self,
        _namespace: &str,
        release: &str,
        _timeout_secs: u64,
    ) -> Result<(), ClusterFailure> {
        if self.fail_rollout {
            return Err(ClusterFailure {
                message: "rollout did not become ready in time".to_string(),
                log: "0/1 replicas ready".to_string(),
            });
        }
        self.ops.lock().unwrap().push(ClusterOp::WaitRollout {
            release: release.to_string(),
        });
        Ok(())
    }

    async fn apply_resources(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<(), ClusterFailure> {
        self.ops.lock().unwrap().push(ClusterOp::ApplyResources {
            namespace: namespace.to_string(),
            kinds: resources.iter().map(|r| r.kind().to_string()).collect(),
        });
        Ok(())
    }

    async fn remove_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterFailure> {
        self.ops.lock().unwrap().push(ClusterOp::RemoveIngress {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ClusterFailure> {
        self.ops.lock().unwrap().push(ClusterOp::DeleteNamespace {
            namespace: namespace.to_string(),
        });
        Ok(())
    }
}
