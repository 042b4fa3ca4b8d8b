//! Shared types used across Berth crates.
//!
//! Tenants ("projects"), deployments and their status machine, node
//! capability flags, and image references. Everything here serializes
//! to JSON for storage and for the REST surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for a tenant project.
pub type ProjectId = String;

/// Unique identifier for a deployment.
pub type DeploymentId = String;

// ── Network / capability ──────────────────────────────────────────

/// Which chain network a project (or this node) operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainNetwork {
    Mainnet,
    Mutinynet,
    Regtest,
}

impl ChainNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainNetwork::Mainnet => "mainnet",
            ChainNetwork::Mutinynet => "mutinynet",
            ChainNetwork::Regtest => "regtest",
        }
    }
}

/// Hardware features this node can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCapability {
    pub gpu: bool,
    pub tee: bool,
}

// ── Project ───────────────────────────────────────────────────────

/// A tenant on this hosting node.
///
/// The satoshi balance is signed: metering debits may push it negative,
/// which suspends external reachability until a credit restores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub network: ChainNetwork,
    /// Balance in satoshis. May go negative.
    pub balance_sats: i64,
    /// Dedicated funding key, injected into the workload when funding
    /// is required.
    pub funding_key: Option<String>,
    /// Free-form config overrides, applied last over manifest env.
    pub config_overrides: BTreeMap<String, String>,
    /// Verified custom hostname routed to the frontend, if any.
    pub custom_frontend_domain: Option<String>,
    /// Verified custom hostname routed to the agent, if any.
    pub custom_agent_domain: Option<String>,
    pub funding_required: bool,
    /// Unix timestamp (seconds) when the project was registered.
    pub created_at: u64,
}

impl Project {
    /// Create a project with an empty balance and no overrides.
    pub fn new(id: impl Into<ProjectId>, name: impl Into<String>, network: ChainNetwork) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            network,
            balance_sats: 0,
            funding_key: None,
            config_overrides: BTreeMap::new(),
            custom_frontend_domain: None,
            custom_agent_domain: None,
            funding_required: false,
            created_at: 0,
        }
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// A single submission of (manifest, artifact) for a project.
///
/// Immutable once its images are built; a retry is a brand-new
/// deployment, never an in-place overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    /// Public key of the caller that submitted this deployment.
    pub creator: String,
    /// Storage path of the uploaded artifact archive.
    pub artifact_path: String,
    /// Service selected from a multi-service manifest, if any.
    pub service: Option<String>,
    pub status: DeploymentStatus,
    /// Short failure summary when status is `Failed`.
    pub error: Option<String>,
    pub created_at: u64,
}

/// Lifecycle of a deployment. All transitions are one-way;
/// `RolledOut` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Created,
    Uploading,
    Validating,
    Building,
    Provisioning,
    RolledOut,
    Failed,
}

impl DeploymentStatus {
    /// Ordinal position in the pipeline, used to enforce one-way moves.
    fn rank(&self) -> u8 {
        match self {
            DeploymentStatus::Created => 0,
            DeploymentStatus::Uploading => 1,
            DeploymentStatus::Validating => 2,
            DeploymentStatus::Building => 3,
            DeploymentStatus::Provisioning => 4,
            DeploymentStatus::RolledOut => 5,
            DeploymentStatus::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::RolledOut | DeploymentStatus::Failed)
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_advance_to(&self, next: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Failed is reachable from any non-terminal state.
        if next == DeploymentStatus::Failed {
            return true;
        }
        next.rank() == self.rank() + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Created => "created",
            DeploymentStatus::Uploading => "uploading",
            DeploymentStatus::Validating => "validating",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::RolledOut => "rolled_out",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl Deployment {
    /// Create a deployment in the `Created` state with a derived id.
    pub fn new(
        project_id: impl Into<ProjectId>,
        creator: impl Into<String>,
        artifact_path: impl Into<String>,
        service: Option<String>,
        created_at: u64,
    ) -> Self {
        let project_id = project_id.into();
        let creator = creator.into();
        let id = derive_deployment_id(&project_id, &creator, created_at);
        Self {
            id,
            project_id,
            creator,
            artifact_path: artifact_path.into(),
            service,
            status: DeploymentStatus::Created,
            error: None,
            created_at,
        }
    }

    /// Advance the status machine. Returns false (and leaves the
    /// deployment untouched) if the transition is not a legal forward
    /// move.
    pub fn advance(&mut self, next: DeploymentStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Derive a short, collision-resistant deployment id.
pub fn derive_deployment_id(project_id: &str, creator: &str, created_at: u64) -> DeploymentId {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(creator.as_bytes());
    hasher.update(created_at.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

// ── Images ────────────────────────────────────────────────────────

/// Which container of a workload an image belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Agent,
    Frontend,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Agent => "agent",
            Component::Frontend => "frontend",
        }
    }
}

/// A fully qualified image reference:
/// `{registry}/{project-namespace}/{component}:{deployment_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub namespace: String,
    pub component: Component,
    pub tag: String,
}

impl ImageRef {
    pub fn for_deployment(
        registry: &str,
        project_id: &str,
        component: Component,
        deployment_id: &str,
    ) -> Self {
        Self {
            registry: registry.to_string(),
            namespace: crate::names::project_namespace(project_id),
            component,
            tag: deployment_id.to_string(),
        }
    }

    pub fn reference(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry,
            self.namespace,
            self.component.as_str(),
            self.tag
        )
    }
}
