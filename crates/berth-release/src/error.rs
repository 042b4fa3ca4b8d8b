//! Error types for release orchestration.

use thiserror::Error;

use berth_build::BuildError;
use berth_manifest::ManifestError;
use berth_state::StateError;
use berth_topology::TopologyError;

/// Result type alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("manifest rejected: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Cluster operation failed. `log` is bounded captured output.
    #[error("cluster operation failed: {summary}")]
    Cluster { summary: String, log: String },

    #[error("{stage} stage exceeded its timeout")]
    StageTimeout { stage: &'static str },

    /// The project was deleted while its pipeline was in flight.
    #[error("project no longer exists: {0}")]
    ProjectDeleted(String),
}

impl ReleaseError {
    /// Bounded diagnostics worth persisting to an audit feed.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            ReleaseError::Build(e) => e.diagnostics(),
            ReleaseError::Cluster { log, .. } => Some(log),
            _ => None,
        }
    }
}
