//! HTTP implementations of the outbound collaborator seams.
//!
//! Each collaborator is a small node-local service: the image builder
//! shares the staging volume with the daemon, the cluster endpoint
//! fronts the orchestrator, the metering endpoint aggregates usage,
//! and the advert relay publishes capability advertisements.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use berth_billing::{MeteringSource, ResourceUsage};
use berth_build::{BuilderFailure, ImageBuilder};
use berth_release::{AdvertisementSink, ClusterClient, ClusterFailure, Notifier};
use berth_topology::{Resource, Topology};

fn http_client(timeout_secs: u64) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

async fn failure_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

// ── Builder ────────────────────────────────────────────────────────

pub struct HttpBuilder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBuilder {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ImageBuilder for HttpBuilder {
    async fn build(
        &self,
        context: &Path,
        dockerfile: &Path,
        image: &str,
    ) -> Result<(), BuilderFailure> {
        let response = self
            .client
            .post(format!("{}/v1/builds", self.base_url))
            .json(&serde_json::json!({
                "context": context,
                "dockerfile": dockerfile,
                "image": image,
            }))
            .send()
            .await
            .map_err(|e| BuilderFailure {
                message: format!("build service unreachable: {e}"),
                log: String::new(),
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BuilderFailure {
                message: format!("build of {image} failed"),
                log: failure_body(response).await,
            })
        }
    }

    async fn push(&self, image: &str) -> Result<(), BuilderFailure> {
        let response = self
            .client
            .post(format!("{}/v1/pushes", self.base_url))
            .json(&serde_json::json!({ "image": image }))
            .send()
            .await
            .map_err(|e| BuilderFailure {
                message: format!("build service unreachable: {e}"),
                log: String::new(),
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BuilderFailure {
                message: format!("push of {image} failed"),
                log: failure_body(response).await,
            })
        }
    }
}

// ── Cluster ────────────────────────────────────────────────────────

pub struct HttpCluster {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCluster {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
        action: &str,
    ) -> Result<(), ClusterFailure> {
        let response = response.map_err(|e| ClusterFailure {
            message: format!("cluster endpoint unreachable during {action}: {e}"),
            log: String::new(),
        })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClusterFailure {
                message: format!("{action} failed with {}", response.status()),
                log: failure_body(response).await,
            })
        }
    }
}

#[async_trait]
impl ClusterClient for HttpCluster {
    async fn apply_release(&self, topology: &Topology) -> Result<(), ClusterFailure> {
        let response = self
            .client
            .put(format!(
                "{}/v1/namespaces/{}/releases/{}",
                self.base_url, topology.namespace, topology.release
            ))
            .json(topology)
            .send()
            .await;
        self.check(response, "release apply").await
    }

    async fn wait_rollout(
        &self,
        namespace: &str,
        release: &str,
        timeout_secs: u64,
    ) -> Result<(), ClusterFailure> {
        let response = self
            .client
            .post(format!(
                "{}/v1/namespaces/{namespace}/releases/{release}/rollout-wait",
                self.base_url
            ))
            .json(&serde_json::json!({ "timeout_secs": timeout_secs }))
            .timeout(Duration::from_secs(timeout_secs + 5))
            .send()
            .await;
        self.check(response, "rollout wait").await
    }

    async fn apply_resources(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<(), ClusterFailure> {
        let response = self
            .client
            .post(format!("{}/v1/namespaces/{namespace}/resources", self.base_url))
            .json(resources)
            .send()
            .await;
        self.check(response, "resource apply").await
    }

    async fn remove_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterFailure> {
        let response = self
            .client
            .delete(format!(
                "{}/v1/namespaces/{namespace}/ingresses/{name}",
                self.base_url
            ))
            .send()
            .await;
        self.check(response, "ingress removal").await
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ClusterFailure> {
        let response = self
            .client
            .delete(format!("{}/v1/namespaces/{namespace}", self.base_url))
            .send()
            .await;
        self.check(response, "namespace deletion").await
    }
}

// ── Metering ───────────────────────────────────────────────────────

pub struct HttpMetering {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetering {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(serde::Deserialize)]
struct UsageBody {
    cpu_millis: u64,
    memory_mb: u64,
    storage_gb: u64,
    #[serde(default)]
    gpu: bool,
}

#[async_trait]
impl MeteringSource for HttpMetering {
    async fn usage(&self, project_id: &str) -> anyhow::Result<Option<ResourceUsage>> {
        let response = self
            .client
            .get(format!("{}/v1/usage/{project_id}", self.base_url))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT
            || response.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        let body: UsageBody = response.error_for_status()?.json().await?;
        Ok(Some(ResourceUsage {
            cpu_millis: body.cpu_millis,
            memory_mb: body.memory_mb,
            storage_gb: body.storage_gb,
            gpu: body.gpu,
        }))
    }
}

// ── Adverts ────────────────────────────────────────────────────────

pub struct HttpAdvertSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAdvertSink {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AdvertisementSink for HttpAdvertSink {
    async fn refresh(&self, project_id: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{}/v1/adverts/{project_id}/refresh", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

// ── Notifications ──────────────────────────────────────────────────

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "subject": subject, "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
