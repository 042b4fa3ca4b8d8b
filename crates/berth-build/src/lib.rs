//! Artifact staging, Dockerfile synthesis, and image builds for Berth
//! deployments.
//!
//! The pipeline stages an uploaded gzip tarball into a
//! deployment-scoped directory, resolves how each image is produced
//! (pre-built reference, user Dockerfile, identity-agent template, or
//! runtime synthesis), writes any synthesized files into the staged
//! tree, and drives an [`ImageBuilder`] to build and push tagged
//! images.

pub mod builder;
pub mod dockerfile;
pub mod error;
pub mod pipeline;

pub use builder::{BuilderFailure, ImageBuilder, RecordingBuilder};
pub use error::{BuildError, BuildResult, bounded};
pub use pipeline::{BuildPipeline, BuiltImages};
