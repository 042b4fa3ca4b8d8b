//! Image builder seam.
//!
//! Production wires a registry-backed implementation in the daemon;
//! tests use [`RecordingBuilder`].

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

/// Failure of a single builder invocation, with captured output.
#[derive(Debug, Clone)]
pub struct BuilderFailure {
    pub message: String,
    /// Raw stdout+stderr of the failed invocation. Callers bound it
    /// before persisting or surfacing.
    pub log: String,
}

/// Builds and pushes container images.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build `image` from `dockerfile` with `context` as the build root.
    async fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        image: &str,
    ) -> Result<(), BuilderFailure>;

    /// Push a previously built image to its registry.
    async fn push(&self, image: &str) -> Result<(), BuilderFailure>;
}

/// One recorded builder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderCall {
    Build { dockerfile: String, image: String },
    Push { image: String },
}

/// In-memory builder for tests: records every call and optionally
/// fails builds whose image reference contains a marker substring.
#[derive(Default)]
pub struct RecordingBuilder {
    calls: Mutex<Vec<BuilderCall>>,
    fail_on: Option<String>,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any build whose image reference contains `marker`.
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(marker.into()),
        }
    }

    pub fn calls(&self) -> Vec<BuilderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn build_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BuilderCall::Build { .. }))
            .count()
    }

    pub fn push_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, BuilderCall::Push { .. }))
            .count()
    }
}

#[async_trait]
impl ImageBuilder for RecordingBuilder {
    async fn build(
        &self,
        _context: &Path,
        dockerfile: &Path,
        image: &str,
    ) -> Result<(), BuilderFailure> {
        if let Some(marker) = &self.fail_on {
            if image.contains(marker.as_str()) {
                return Err(BuilderFailure {
                    message: "simulated build failure".to_string(),
                    log: "step 3/7: command exited with status 1".to_string(),
                });
            }
        }
        self.calls.lock().unwrap().push(BuilderCall::Build {
            dockerfile: dockerfile.display().to_string(),
            image: image.to_string(),
        });
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), BuilderFailure> {
        self.calls.lock().unwrap().push(BuilderCall::Push {
            image: image.to_string(),
        });
        Ok(())
    }
}
