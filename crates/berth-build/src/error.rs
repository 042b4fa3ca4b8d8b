//! Error types for the build pipeline.

use thiserror::Error;

/// Result type alias for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Maximum bytes of builder output attached to an error or persisted
/// to an audit feed.
pub const DIAGNOSTIC_CAP: usize = 8 * 1024;

/// Truncate diagnostics to [`DIAGNOSTIC_CAP`] bytes on a char boundary.
pub fn bounded(log: &str) -> String {
    if log.len() <= DIAGNOSTIC_CAP {
        return log.to_string();
    }
    let mut cut = DIAGNOSTIC_CAP;
    while !log.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated]", &log[..cut])
}

/// Errors that can occur while staging an artifact or building images.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to stage artifact: {0}")]
    Stage(#[from] std::io::Error),

    #[error("invalid artifact archive: {0}")]
    Archive(String),

    #[error("archive entry escapes the staging directory: {0}")]
    PathTraversal(String),

    #[error("dockerfile not found in artifact: {0}")]
    MissingDockerfile(String),

    #[error("frontend directory not found in artifact: {0}")]
    MissingFrontendDir(String),

    /// Builder invocation failed. `log` is bounded captured output,
    /// surfaced to audit feeds rather than echoed to callers.
    #[error("image build failed: {summary}")]
    Builder { summary: String, log: String },

    #[error("image push timed out after {0}s")]
    PushTimeout(u64),
}

impl BuildError {
    /// Short form safe to return to callers.
    pub fn summary(&self) -> String {
        self.to_string()
    }

    /// Bounded diagnostics for audit persistence, if any were captured.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BuildError::Builder { log, .. } => Some(log),
            _ => None,
        }
    }
}
