//! The release manager: one deployment pipeline at a time per project.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{info, warn};

use berth_build::{bounded, BuildPipeline};
use berth_core::config::{NodeConfig, TimeoutsSection};
use berth_core::{names, Deployment, DeploymentStatus, NodeCapability, Project};
use berth_manifest::{compile, ManifestDocument};
use berth_state::{AuditEvent, StateStore};
use berth_topology::{generate, TopologyParams, WorkloadImages};

use crate::cluster::{ClusterClient, ClusterFailure};
use crate::error::{ReleaseError, ReleaseResult};
use crate::notify::Notifier;

/// Node-level inputs the manager needs from configuration.
#[derive(Debug, Clone)]
pub struct ReleaseSettings {
    pub capability: NodeCapability,
    pub topology: TopologyParams,
    pub timeouts: TimeoutsSection,
}

impl ReleaseSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            capability: config.capability,
            topology: TopologyParams {
                base_domain: config.node.base_domain.clone(),
                database_volume_gb: config.volumes.database_gb,
            },
            timeouts: config.timeouts.clone(),
        }
    }
}

/// Drives deployments through the pipeline stages and applies the
/// resulting release to the cluster.
///
/// Applies against the same project serialize on a keyed async lock;
/// the project row is re-read between stages so a concurrent delete
/// fences the pipeline instead of resurrecting the tenant.
pub struct ReleaseManager {
    store: StateStore,
    pipeline: Arc<BuildPipeline>,
    cluster: Arc<dyn ClusterClient>,
    notifier: Arc<dyn Notifier>,
    adverts: mpsc::Sender<String>,
    settings: ReleaseSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReleaseManager {
    pub fn new(
        store: StateStore,
        pipeline: Arc<BuildPipeline>,
        cluster: Arc<dyn ClusterClient>,
        notifier: Arc<dyn Notifier>,
        adverts: mpsc::Sender<String>,
        settings: ReleaseSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            cluster,
            notifier,
            adverts,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run the full pipeline for an already-registered deployment. On
    /// failure the deployment is marked `Failed`, bounded diagnostics
    /// land in both audit feeds, and admins are notified best-effort.
    pub async fn deploy(
        &self,
        deployment: &Deployment,
        manifest: &ManifestDocument,
    ) -> ReleaseResult<Deployment> {
        let lock = self.lock_for(&deployment.project_id);
        let _guard = lock.lock().await;

        match self.execute(deployment, manifest).await {
            Ok(done) => {
                info!(
                    project = %done.project_id,
                    deployment = %done.id,
                    "deployment rolled out"
                );
                Ok(done)
            }
            Err(err) => {
                self.record_failure(deployment, &err).await;
                Err(err)
            }
        }
    }

    /// Delete a tenant: namespace teardown on the cluster, then the
    /// bookkeeping cascade. Holds the project lock so an in-flight
    /// pipeline finishes or fences first.
    pub async fn remove_project(&self, project_id: &str) -> ReleaseResult<bool> {
        let lock = self.lock_for(project_id);
        let _guard = lock.lock().await;

        self.cluster
            .delete_namespace(&names::project_namespace(project_id))
            .await
            .map_err(cluster_err)?;
        let existed = self.store.delete_project(project_id)?;

        self.locks.lock().unwrap().remove(project_id);
        info!(project = %project_id, "project removed");
        Ok(existed)
    }

    async fn execute(
        &self,
        deployment: &Deployment,
        manifest: &ManifestDocument,
    ) -> ReleaseResult<Deployment> {
        let pid = deployment.project_id.as_str();
        let did = deployment.id.as_str();

        self.advance(pid, did, DeploymentStatus::Uploading)?;
        self.advance(pid, did, DeploymentStatus::Validating)?;

        let project = self.fence(pid)?;
        let spec = compile(
            manifest,
            deployment.service.as_deref(),
            &project.id,
            project.network,
            self.settings.capability,
        )?;

        self.advance(pid, did, DeploymentStatus::Building)?;
        let built = tokio::time::timeout(
            Duration::from_secs(self.settings.timeouts.build_secs),
            self.pipeline
                .run(pid, did, Path::new(&deployment.artifact_path), &spec),
        )
        .await
        .map_err(|_| ReleaseError::StageTimeout { stage: "build" })??;

        let project = self.fence(pid)?;
        self.advance(pid, did, DeploymentStatus::Provisioning)?;

        let images = WorkloadImages {
            agent: built.agent,
            frontend: built.frontend,
        };
        let topology = generate(&spec, &project, &images, &self.settings.topology)?;

        tokio::time::timeout(
            Duration::from_secs(self.settings.timeouts.apply_secs),
            self.cluster.apply_release(&topology),
        )
        .await
        .map_err(|_| ReleaseError::StageTimeout { stage: "apply" })?
        .map_err(cluster_err)?;

        self.cluster
            .wait_rollout(
                &topology.namespace,
                &topology.release,
                self.settings.timeouts.rollout_secs,
            )
            .await
            .map_err(cluster_err)?;

        self.fence(pid)?;
        let done = self
            .store
            .advance_deployment(pid, did, DeploymentStatus::RolledOut, None)?;
        self.store.put_spec(pid, &spec)?;

        let event = AuditEvent {
            project_id: pid.to_string(),
            deployment_id: Some(did.to_string()),
            summary: format!("deployment {did} rolled out"),
            detail: String::new(),
            created_at: epoch_secs(),
        };
        for scope in [pid, did] {
            if let Err(e) = self.store.append_audit(scope, &event) {
                warn!(scope = %scope, error = %e, "failed to record audit event");
            }
        }

        // Refresh the capability advertisement off the critical path.
        if let Err(e) = self.adverts.try_send(pid.to_string()) {
            warn!(project = %pid, error = %e, "advert refresh queue full, skipping");
        }

        Ok(done)
    }

    fn advance(&self, project_id: &str, deployment_id: &str, next: DeploymentStatus) -> ReleaseResult<()> {
        self.store
            .advance_deployment(project_id, deployment_id, next, None)?;
        Ok(())
    }

    /// Deletion fence: re-read the project row between stages.
    fn fence(&self, project_id: &str) -> ReleaseResult<Project> {
        self.store
            .get_project(project_id)?
            .ok_or_else(|| ReleaseError::ProjectDeleted(project_id.to_string()))
    }

    async fn record_failure(&self, deployment: &Deployment, err: &ReleaseError) {
        let summary = err.to_string();
        let detail = err.diagnostics().unwrap_or(summary.as_str());

        if let Err(e) = self.store.advance_deployment(
            &deployment.project_id,
            &deployment.id,
            DeploymentStatus::Failed,
            Some(&summary),
        ) {
            warn!(deployment = %deployment.id, error = %e, "failed to mark deployment failed");
        }

        let event = AuditEvent {
            project_id: deployment.project_id.clone(),
            deployment_id: Some(deployment.id.clone()),
            summary: summary.clone(),
            detail: bounded(detail),
            created_at: epoch_secs(),
        };
        for scope in [deployment.project_id.as_str(), deployment.id.as_str()] {
            if let Err(e) = self.store.append_audit(scope, &event) {
                warn!(scope = %scope, error = %e, "failed to record audit event");
            }
        }

        if let Err(e) = self
            .notifier
            .notify(&format!("deployment {} failed", deployment.id), &summary)
            .await
        {
            warn!(error = %e, "admin notification failed");
        }
    }

    fn lock_for(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn cluster_err(f: ClusterFailure) -> ReleaseError {
    ReleaseError::Cluster {
        summary: f.message,
        log: bounded(&f.log),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
