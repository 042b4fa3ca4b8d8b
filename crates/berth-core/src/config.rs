//! berth.toml node configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{ChainNetwork, NodeCapability};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub registry: RegistrySection,
    #[serde(default)]
    pub capability: NodeCapability,
    #[serde(default)]
    pub billing: BillingSection,
    #[serde(default)]
    pub volumes: VolumesSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub services: ServicesSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Stable identifier for this node.
    pub id: String,
    pub network: ChainNetwork,
    /// Base domain under which generated hostnames live.
    pub base_domain: String,
    /// Deployment-id-scoped staging area for extracted artifacts.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Registry host images are tagged with and pushed to.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSection {
    /// Satoshis per CPU core-hour.
    pub cpu_sats_per_core_hour: u64,
    /// Satoshis per GiB-hour of memory.
    pub memory_sats_per_gb_hour: u64,
    /// Satoshis per GiB-hour of storage.
    pub storage_sats_per_gb_hour: u64,
    /// Satoshis per GPU-hour.
    pub gpu_sats_per_hour: u64,
    /// Metering interval in seconds.
    pub interval_secs: u64,
}

impl Default for BillingSection {
    fn default() -> Self {
        Self {
            cpu_sats_per_core_hour: 100,
            memory_sats_per_gb_hour: 50,
            storage_sats_per_gb_hour: 10,
            gpu_sats_per_hour: 2000,
            interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumesSection {
    /// Volume claim size for each stateful database workload, in GiB.
    pub database_gb: u32,
}

impl Default for VolumesSection {
    fn default() -> Self {
        Self { database_gb: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    pub build_secs: u64,
    pub push_secs: u64,
    pub apply_secs: u64,
    pub rollout_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            build_secs: 900,
            push_secs: 300,
            apply_secs: 120,
            rollout_secs: 300,
        }
    }
}

/// Endpoints of the node-local collaborator services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesSection {
    /// Image build service.
    pub builder_url: String,
    /// Cluster control endpoint.
    pub cluster_url: String,
    /// Usage metering endpoint.
    pub metering_url: String,
    /// Capability-advertisement relay.
    pub advert_url: String,
    /// Optional admin-notification webhook. Absent means log-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_webhook: Option<String>,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            builder_url: "http://127.0.0.1:7070".to_string(),
            cluster_url: "http://127.0.0.1:7080".to_string(),
            metering_url: "http://127.0.0.1:7090".to_string(),
            advert_url: "http://127.0.0.1:7100".to_string(),
            notify_webhook: None,
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth/staging")
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal berth.toml for a node.
    pub fn scaffold(node_id: &str, network: ChainNetwork, base_domain: &str) -> Self {
        NodeConfig {
            node: NodeSection {
                id: node_id.to_string(),
                network,
                base_domain: base_domain.to_string(),
                staging_dir: default_staging_dir(),
            },
            registry: RegistrySection {
                host: format!("registry.{base_domain}"),
            },
            capability: NodeCapability::default(),
            billing: BillingSection::default(),
            volumes: VolumesSection::default(),
            timeouts: TimeoutsSection::default(),
            services: ServicesSection::default(),
        }
    }
}
