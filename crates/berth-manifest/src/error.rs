//! Manifest compilation errors.
//!
//! All of these are terminal validation failures: nothing is built,
//! nothing is retried.

use thiserror::Error;

/// Result type alias for manifest compilation.
pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("unrecognized manifest schema: expected \"{expected}\", found \"{found}\"")]
    SchemaMismatch { expected: &'static str, found: String },

    #[error("multi-service manifest requires a service selector")]
    MissingServiceSelector,

    #[error("manifest declares no service named \"{0}\"")]
    UnknownService(String),

    #[error("this node cannot schedule the requested resource: {0}")]
    UnsupportedResource(&'static str),

    #[error("no deployment target matches this node")]
    NoMatchingTarget,

    #[error("deployment target matches this node but declares network {declared}, node runs {node}")]
    NetworkMismatch { declared: String, node: String },
}
