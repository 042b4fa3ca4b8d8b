//! The billing gate: periodic metering debits plus the
//! suspend/restore edge actions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use berth_core::config::BillingSection;
use berth_core::names;
use berth_release::{ClusterClient, ClusterFailure};
use berth_state::{BalanceChange, StateError, StateStore};
use berth_topology::{generate_ingresses, TopologyParams};

/// Result type alias for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("cluster operation failed: {0}")]
    Cluster(String),

    #[error("metering source failed: {0}")]
    Metering(String),
}

impl From<ClusterFailure> for BillingError {
    fn from(f: ClusterFailure) -> Self {
        BillingError::Cluster(f.message)
    }
}

/// Resource consumption of one tenant over a metering window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Average CPU in millicores.
    pub cpu_millis: u64,
    /// Average memory in MiB.
    pub memory_mb: u64,
    /// Provisioned storage in GiB.
    pub storage_gb: u64,
    pub gpu: bool,
}

/// Supplies per-tenant usage. External collaborator; `None` means the
/// tenant has nothing running this window.
#[async_trait]
pub trait MeteringSource: Send + Sync {
    async fn usage(&self, project_id: &str) -> anyhow::Result<Option<ResourceUsage>>;
}

/// Window cost in satoshis for one tenant's usage at the configured
/// hourly rates, prorated by window length.
pub fn cost_for(usage: &ResourceUsage, rates: &BillingSection, window_secs: u64) -> u64 {
    let per_hour = usage.cpu_millis * rates.cpu_sats_per_core_hour / 1000
        + usage.memory_mb * rates.memory_sats_per_gb_hour / 1024
        + usage.storage_gb * rates.storage_sats_per_gb_hour
        + if usage.gpu { rates.gpu_sats_per_hour } else { 0 };
    per_hour * window_secs / 3600
}

/// Debits balances each window and flips ingress on arrears crossings.
pub struct BillingGate {
    store: StateStore,
    cluster: Arc<dyn ClusterClient>,
    metering: Arc<dyn MeteringSource>,
    rates: BillingSection,
    topology: TopologyParams,
}

impl BillingGate {
    pub fn new(
        store: StateStore,
        cluster: Arc<dyn ClusterClient>,
        metering: Arc<dyn MeteringSource>,
        rates: BillingSection,
        topology: TopologyParams,
    ) -> Self {
        Self {
            store,
            cluster,
            metering,
            rates,
            topology,
        }
    }

    /// Periodic metering loop. Runs until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.rates.interval_secs));
        info!(interval_secs = self.rates.interval_secs, "billing gate started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle().await {
                        warn!(error = %e, "billing cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("billing gate stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One metering pass over every tenant. Per-tenant failures are
    /// logged and skipped so one tenant can't stall the others.
    pub async fn cycle(&self) -> BillingResult<()> {
        for project in self.store.list_projects()? {
            if let Err(e) = self.meter_project(&project.id).await {
                warn!(project = %project.id, error = %e, "metering skipped");
            }
        }
        Ok(())
    }

    async fn meter_project(&self, project_id: &str) -> BillingResult<()> {
        let usage = self
            .metering
            .usage(project_id)
            .await
            .map_err(|e| BillingError::Metering(e.to_string()))?;
        let Some(usage) = usage else {
            return Ok(());
        };

        let cost = cost_for(&usage, &self.rates, self.rates.interval_secs);
        if cost == 0 {
            return Ok(());
        }

        let change = self.store.debit(project_id, cost, "metering window")?;
        debug!(
            project = %project_id,
            cost,
            balance = change.entry.balance_after,
            "tenant metered"
        );

        if change.crossed_into_arrears() {
            self.suspend(project_id).await?;
        }
        Ok(())
    }

    /// Withhold external reachability: remove the ingress, leave the
    /// workload running.
    async fn suspend(&self, project_id: &str) -> BillingResult<()> {
        let namespace = names::project_namespace(project_id);
        self.cluster
            .remove_ingress(&namespace, &berth_topology::names::ingress_name(project_id))
            .await?;
        info!(project = %project_id, "tenant suspended, ingress withheld");
        Ok(())
    }

    /// Credit a payment. Crossing back to a non-negative balance
    /// re-applies only the ingress resources; nothing is rebuilt.
    pub async fn credit(
        &self,
        project_id: &str,
        amount_sats: u64,
        reason: &str,
    ) -> BillingResult<BalanceChange> {
        let change = self.store.credit(project_id, amount_sats, reason)?;

        if change.crossed_out_of_arrears() {
            let project = self
                .store
                .get_project(project_id)?
                .ok_or_else(|| StateError::NotFound(format!("project {project_id}")))?;
            if let Some(spec) = self.store.get_spec(project_id)? {
                let resources = generate_ingresses(&spec, &project, &self.topology);
                let namespace = names::project_namespace(project_id);
                self.cluster.apply_resources(&namespace, &resources).await?;
                info!(project = %project_id, "tenant restored, ingress re-applied");
            }
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{ChainNetwork, Project};
    use berth_release::{ClusterOp, RecordingCluster};
    use berth_state::LedgerEntryType;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedMetering {
        usage: Mutex<HashMap<String, ResourceUsage>>,
    }

    impl FixedMetering {
        fn with(project_id: &str, usage: ResourceUsage) -> Self {
            let mut map = HashMap::new();
            map.insert(project_id.to_string(), usage);
            Self { usage: Mutex::new(map) }
        }

        fn empty() -> Self {
            Self { usage: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl MeteringSource for FixedMetering {
        async fn usage(&self, project_id: &str) -> anyhow::Result<Option<ResourceUsage>> {
            Ok(self.usage.lock().unwrap().get(project_id).copied())
        }
    }

    fn rates() -> BillingSection {
        BillingSection {
            cpu_sats_per_core_hour: 100,
            memory_sats_per_gb_hour: 50,
            storage_sats_per_gb_hour: 10,
            gpu_sats_per_hour: 2000,
            interval_secs: 3600,
        }
    }

    fn gate(metering: FixedMetering) -> (BillingGate, Arc<RecordingCluster>, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = Arc::new(RecordingCluster::new());
        let gate = BillingGate::new(
            store.clone(),
            cluster.clone(),
            Arc::new(metering),
            rates(),
            TopologyParams {
                base_domain: "berth.host".to_string(),
                database_volume_gb: 10,
            },
        );
        (gate, cluster, store)
    }

    fn minimal_spec() -> berth_manifest::ServiceSpec {
        serde_json::from_value(serde_json::json!({
            "name": "default",
            "build": {"method": "prebuilt", "image": "ghcr.io/acme/agent:v3"},
            "runtime": "node",
            "env": {},
            "resources": {"cpu_millis": 500, "memory_mb": 512, "gpu": false, "tee": false},
            "ports": [8080],
            "health": null,
            "frontend": null,
            "storage": null,
            "databases": {"mysql": false, "mongo": false, "redis": false}
        }))
        .unwrap()
    }

    #[test]
    fn window_cost_prorates_hourly_rates() {
        let usage = ResourceUsage {
            cpu_millis: 2000,
            memory_mb: 1024,
            storage_gb: 5,
            gpu: false,
        };
        // 2 cores * 100 + 1 GiB * 50 + 5 GiB * 10 = 300 sats/hour.
        assert_eq!(cost_for(&usage, &rates(), 3600), 300);
        assert_eq!(cost_for(&usage, &rates(), 1800), 150);

        let gpu = ResourceUsage { gpu: true, ..ResourceUsage::default() };
        assert_eq!(cost_for(&gpu, &rates(), 3600), 2000);
    }

    #[tokio::test]
    async fn arrears_crossing_withholds_the_ingress() {
        let usage = ResourceUsage { cpu_millis: 1000, ..ResourceUsage::default() };
        let (gate, cluster, store) = gate(FixedMetering::with("proj-1", usage));
        let mut project = Project::new("proj-1", "Test", ChainNetwork::Mutinynet);
        project.balance_sats = 40;
        store.put_project(&project).unwrap();

        gate.cycle().await.unwrap();

        assert_eq!(store.get_project("proj-1").unwrap().unwrap().balance_sats, -60);
        let removes: Vec<_> = cluster
            .ops()
            .iter()
            .filter(|op| matches!(op, ClusterOp::RemoveIngress { .. }))
            .cloned()
            .collect();
        assert_eq!(
            removes,
            vec![ClusterOp::RemoveIngress {
                namespace: "tenant-proj-1".to_string(),
                name: "agent-proj-1-ing".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn already_suspended_tenants_are_not_re_suspended() {
        let usage = ResourceUsage { cpu_millis: 1000, ..ResourceUsage::default() };
        let (gate, cluster, store) = gate(FixedMetering::with("proj-1", usage));
        store
            .put_project(&Project::new("proj-1", "Test", ChainNetwork::Mutinynet))
            .unwrap();

        gate.cycle().await.unwrap();
        gate.cycle().await.unwrap();

        let removes = cluster
            .ops()
            .iter()
            .filter(|op| matches!(op, ClusterOp::RemoveIngress { .. }))
            .count();
        assert_eq!(removes, 1);
        assert_eq!(store.list_ledger("proj-1", 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn credit_restores_ingress_exactly_once() {
        let (gate, cluster, store) = gate(FixedMetering::empty());
        let mut project = Project::new("proj-1", "Test", ChainNetwork::Mutinynet);
        project.balance_sats = -1;
        store.put_project(&project).unwrap();
        store.put_spec("proj-1", &minimal_spec()).unwrap();

        let change = gate.credit("proj-1", 5, "payment").await.unwrap();
        assert_eq!(change.entry.balance_after, 4);

        let ledger = store.list_ledger("proj-1", 10).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry_type, LedgerEntryType::Credit);
        assert_eq!(ledger[0].amount_sats, 5);

        let applies: Vec<_> = cluster
            .ops()
            .iter()
            .filter(|op| matches!(op, ClusterOp::ApplyResources { .. }))
            .cloned()
            .collect();
        assert_eq!(
            applies,
            vec![ClusterOp::ApplyResources {
                namespace: "tenant-proj-1".to_string(),
                kinds: vec!["ingress".to_string()],
            }]
        );

        // A further credit while already funded touches nothing.
        gate.credit("proj-1", 5, "payment").await.unwrap();
        assert_eq!(
            cluster
                .ops()
                .iter()
                .filter(|op| matches!(op, ClusterOp::ApplyResources { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn idle_tenants_are_not_charged() {
        let (gate, _cluster, store) = gate(FixedMetering::empty());
        store
            .put_project(&Project::new("proj-1", "Test", ChainNetwork::Mutinynet))
            .unwrap();

        gate.cycle().await.unwrap();
        assert!(store.list_ledger("proj-1", 10).unwrap().is_empty());
        assert_eq!(store.get_project("proj-1").unwrap().unwrap().balance_sats, 0);
    }
}
