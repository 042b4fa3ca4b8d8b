//! Deployment build pipeline: stage the artifact, resolve how each
//! image is produced, synthesize missing Dockerfiles, build, push.

use std::fs;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use berth_core::{Component, ImageRef};
use berth_manifest::{BuildMethod, FrontendSpec, ServiceSpec};

use crate::builder::ImageBuilder;
use crate::dockerfile;
use crate::error::{bounded, BuildError, BuildResult};

/// Image references produced by a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImages {
    pub agent: String,
    pub frontend: Option<String>,
}

/// Stages artifacts and drives the [`ImageBuilder`].
pub struct BuildPipeline {
    registry: String,
    staging_root: PathBuf,
    builder: Arc<dyn ImageBuilder>,
    push_timeout: Duration,
}

impl BuildPipeline {
    pub fn new(
        registry: impl Into<String>,
        staging_root: impl Into<PathBuf>,
        builder: Arc<dyn ImageBuilder>,
        push_secs: u64,
    ) -> Self {
        Self {
            registry: registry.into(),
            staging_root: staging_root.into(),
            builder,
            push_timeout: Duration::from_secs(push_secs),
        }
    }

    /// Run the full pipeline for one deployment. Synthesized files are
    /// written into the staged tree before the builder is invoked.
    pub async fn run(
        &self,
        project_id: &str,
        deployment_id: &str,
        artifact_path: &Path,
        spec: &ServiceSpec,
    ) -> BuildResult<BuiltImages> {
        let stage = self.stage_artifact(deployment_id, artifact_path)?;

        let agent = match &spec.build {
            BuildMethod::Prebuilt { image } => {
                debug!(image = %image, "using pre-built agent image");
                image.clone()
            }
            BuildMethod::Dockerfile { dockerfile, context } => {
                let (context_dir, dockerfile_path) =
                    resolve_user_dockerfile(&stage, dockerfile, context.as_deref())?;
                self.build_and_push(project_id, deployment_id, Component::Agent, &context_dir, &dockerfile_path)
                    .await?
            }
            BuildMethod::IdentityAgent => {
                let contents = dockerfile::identity_agent_dockerfile(&stage, spec.primary_port());
                let dockerfile_path = stage.join("Dockerfile");
                fs::write(&dockerfile_path, contents)?;
                self.build_and_push(project_id, deployment_id, Component::Agent, &stage, &dockerfile_path)
                    .await?
            }
            BuildMethod::FromRuntime => {
                let contents = dockerfile::runtime_dockerfile(spec.runtime, spec.primary_port());
                let dockerfile_path = stage.join("Dockerfile");
                fs::write(&dockerfile_path, contents)?;
                self.build_and_push(project_id, deployment_id, Component::Agent, &stage, &dockerfile_path)
                    .await?
            }
        };

        let frontend = match &spec.frontend {
            None => None,
            Some(FrontendSpec::Prebuilt { image }) => {
                debug!(image = %image, "using pre-built frontend image");
                Some(image.clone())
            }
            Some(FrontendSpec::StaticDir { dir, spa }) => {
                if !stage.join(dir).is_dir() {
                    return Err(BuildError::MissingFrontendDir(dir.clone()));
                }
                let dockerfile_path = stage.join("Dockerfile.frontend");
                fs::write(&dockerfile_path, dockerfile::frontend_dockerfile(dir, *spa))?;
                if *spa {
                    fs::write(stage.join("frontend-server.conf"), dockerfile::spa_server_conf())?;
                }
                let image = self
                    .build_and_push(project_id, deployment_id, Component::Frontend, &stage, &dockerfile_path)
                    .await?;
                Some(image)
            }
        };

        Ok(BuiltImages { agent, frontend })
    }

    /// Extract the gzip tarball into a deployment-scoped directory,
    /// rejecting entries that would escape it.
    fn stage_artifact(&self, deployment_id: &str, artifact_path: &Path) -> BuildResult<PathBuf> {
        let stage = self.staging_root.join(deployment_id);
        fs::create_dir_all(&stage)?;

        let file = fs::File::open(artifact_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        for entry in archive.entries().map_err(|e| BuildError::Archive(e.to_string()))? {
            let mut entry = entry.map_err(|e| BuildError::Archive(e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| BuildError::Archive(e.to_string()))?
                .into_owned();
            if path.is_absolute()
                || path
                    .components()
                    .any(|c| matches!(c, PathComponent::ParentDir))
            {
                return Err(BuildError::PathTraversal(path.display().to_string()));
            }
            entry
                .unpack(stage.join(&path))
                .map_err(|e| BuildError::Archive(e.to_string()))?;
        }
        debug!(deployment = %deployment_id, stage = %stage.display(), "artifact staged");
        Ok(stage)
    }

    async fn build_and_push(
        &self,
        project_id: &str,
        deployment_id: &str,
        component: Component,
        context: &Path,
        dockerfile_path: &Path,
    ) -> BuildResult<String> {
        let image =
            ImageRef::for_deployment(&self.registry, project_id, component, deployment_id).reference();

        self.builder
            .build(context, dockerfile_path, &image)
            .await
            .map_err(|f| BuildError::Builder {
                summary: f.message,
                log: bounded(&f.log),
            })?;
        tokio::time::timeout(self.push_timeout, self.builder.push(&image))
            .await
            .map_err(|_| BuildError::PushTimeout(self.push_timeout.as_secs()))?
            .map_err(|f| BuildError::Builder {
                summary: f.message,
                log: bounded(&f.log),
            })?;

        info!(image = %image, component = component.as_str(), "image built and pushed");
        Ok(image)
    }
}

/// Locate a user-supplied Dockerfile and its build context. When the
/// Dockerfile lives outside the context directory, copy it in so the
/// builder sees a co-located pair.
fn resolve_user_dockerfile(
    stage: &Path,
    dockerfile: &str,
    context: Option<&str>,
) -> BuildResult<(PathBuf, PathBuf)> {
    let context_dir = match context {
        Some(c) => stage.join(c),
        None => stage.to_path_buf(),
    };
    let source = stage.join(dockerfile);
    if !source.is_file() {
        return Err(BuildError::MissingDockerfile(dockerfile.to_string()));
    }
    if source.parent() == Some(context_dir.as_path()) {
        return Ok((context_dir, source));
    }
    let target = context_dir.join("Dockerfile");
    fs::create_dir_all(&context_dir)?;
    fs::copy(&source, &target)?;
    Ok((context_dir, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuilderCall, RecordingBuilder};
    use berth_manifest::{DatabaseFlags, Resources, Runtime};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::BTreeMap;

    fn spec_with(build: BuildMethod) -> ServiceSpec {
        ServiceSpec {
            name: "default".to_string(),
            build,
            runtime: Runtime::Node,
            env: BTreeMap::new(),
            resources: Resources::default(),
            ports: vec![3000],
            health: None,
            frontend: None,
            storage: None,
            databases: DatabaseFlags::default(),
        }
    }

    /// Write a gzip tarball with the given (path, contents) entries.
    fn make_artifact(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("artifact.tar.gz");
        let file = fs::File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
        path
    }

    fn pipeline(dir: &Path, builder: Arc<RecordingBuilder>) -> BuildPipeline {
        BuildPipeline::new("registry.berth.host", dir.join("staging"), builder, 300)
    }

    #[tokio::test]
    async fn runtime_synthesis_builds_and_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("package.json", "{}")]);
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        let images = p
            .run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::FromRuntime))
            .await
            .unwrap();

        assert_eq!(images.agent, "registry.berth.host/tenant-proj-1/agent:deadbeef");
        assert_eq!(builder.build_count(), 1);
        assert_eq!(builder.push_count(), 1);

        let stage = dir.path().join("staging").join("deadbeef");
        assert!(stage.join("package.json").is_file());
        let df = fs::read_to_string(stage.join("Dockerfile")).unwrap();
        assert!(df.starts_with("FROM node:20-alpine"));
    }

    #[tokio::test]
    async fn prebuilt_image_skips_the_builder() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("README.md", "hi")]);
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        let images = p
            .run(
                "proj-1",
                "deadbeef",
                &artifact,
                &spec_with(BuildMethod::Prebuilt {
                    image: "ghcr.io/acme/agent:v3".to_string(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(images.agent, "ghcr.io/acme/agent:v3");
        assert!(builder.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_path_traversal_entries() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("../evil.txt", "pwned")]);
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        let err = p
            .run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::FromRuntime))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::PathTraversal(_)));
        assert!(builder.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_user_dockerfile_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("src/index.js", "// app")]);
        let p = pipeline(dir.path(), Arc::new(RecordingBuilder::new()));

        let err = p
            .run(
                "proj-1",
                "deadbeef",
                &artifact,
                &spec_with(BuildMethod::Dockerfile {
                    dockerfile: "Dockerfile".to_string(),
                    context: None,
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::MissingDockerfile(_)));
    }

    #[tokio::test]
    async fn user_dockerfile_is_copied_into_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(
            dir.path(),
            &[("docker/Dockerfile", "FROM scratch\n"), ("app/main.py", "print()")],
        );
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        p.run(
            "proj-1",
            "deadbeef",
            &artifact,
            &spec_with(BuildMethod::Dockerfile {
                dockerfile: "docker/Dockerfile".to_string(),
                context: Some("app".to_string()),
            }),
        )
        .await
        .unwrap();

        let copied = dir
            .path()
            .join("staging")
            .join("deadbeef")
            .join("app")
            .join("Dockerfile");
        assert_eq!(fs::read_to_string(copied).unwrap(), "FROM scratch\n");
    }

    #[tokio::test]
    async fn identity_agent_copies_optional_dirs_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(
            dir.path(),
            &[("package.json", "{}"), ("src/index.js", "// a"), ("tools/x.js", "// t")],
        );
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        p.run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::IdentityAgent))
            .await
            .unwrap();

        let df = fs::read_to_string(
            dir.path().join("staging").join("deadbeef").join("Dockerfile"),
        )
        .unwrap();
        assert!(df.contains("COPY tools/ ./tools/"));
        assert!(!df.contains("COPY data/"));
    }

    #[tokio::test]
    async fn static_frontend_builds_a_second_image() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(
            dir.path(),
            &[("package.json", "{}"), ("dist/index.html", "<html/>")],
        );
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        let mut spec = spec_with(BuildMethod::FromRuntime);
        spec.frontend = Some(FrontendSpec::StaticDir {
            dir: "dist".to_string(),
            spa: true,
        });

        let images = p.run("proj-1", "deadbeef", &artifact, &spec).await.unwrap();

        assert_eq!(
            images.frontend.as_deref(),
            Some("registry.berth.host/tenant-proj-1/frontend:deadbeef")
        );
        assert_eq!(builder.build_count(), 2);
        assert_eq!(builder.push_count(), 2);

        let stage = dir.path().join("staging").join("deadbeef");
        assert!(stage.join("frontend-server.conf").is_file());
    }

    #[tokio::test]
    async fn missing_frontend_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("package.json", "{}")]);
        let p = pipeline(dir.path(), Arc::new(RecordingBuilder::new()));

        let mut spec = spec_with(BuildMethod::FromRuntime);
        spec.frontend = Some(FrontendSpec::StaticDir {
            dir: "dist".to_string(),
            spa: false,
        });

        let err = p.run("proj-1", "deadbeef", &artifact, &spec).await.unwrap_err();
        assert!(matches!(err, BuildError::MissingFrontendDir(_)));
    }

    #[tokio::test]
    async fn builder_failure_carries_bounded_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("package.json", "{}")]);
        let builder = Arc::new(RecordingBuilder::failing_on("agent"));
        let p = pipeline(dir.path(), builder);

        let err = p
            .run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::FromRuntime))
            .await
            .unwrap_err();

        match err {
            BuildError::Builder { summary, log } => {
                assert_eq!(summary, "simulated build failure");
                assert!(log.contains("status 1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct StalledPushBuilder;

    #[async_trait::async_trait]
    impl ImageBuilder for StalledPushBuilder {
        async fn build(
            &self,
            _context: &Path,
            _dockerfile: &Path,
            _image: &str,
        ) -> Result<(), crate::builder::BuilderFailure> {
            Ok(())
        }

        async fn push(&self, _image: &str) -> Result<(), crate::builder::BuilderFailure> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_push_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("package.json", "{}")]);
        let p = BuildPipeline::new(
            "registry.berth.host",
            dir.path().join("staging"),
            Arc::new(StalledPushBuilder),
            30,
        );

        let err = p
            .run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::FromRuntime))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::PushTimeout(30)));
    }

    #[tokio::test]
    async fn build_precedes_push_for_each_image() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = make_artifact(dir.path(), &[("package.json", "{}")]);
        let builder = Arc::new(RecordingBuilder::new());
        let p = pipeline(dir.path(), builder.clone());

        p.run("proj-1", "deadbeef", &artifact, &spec_with(BuildMethod::FromRuntime))
            .await
            .unwrap();

        let calls = builder.calls();
        assert!(matches!(calls[0], BuilderCall::Build { .. }));
        assert!(matches!(calls[1], BuilderCall::Push { .. }));
    }
}
