//! StateStore — redb-backed bookkeeping for the hosting node.
//!
//! Typed CRUD over projects, deployments, specs, ledger entries,
//! audit feeds, and domain records. All values are JSON-serialized
//! into redb's `&[u8]` value columns. Balance mutations and their
//! paired ledger entries commit in a single write transaction, so a
//! balance can never change without an append-only record. Supports
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use berth_core::{Deployment, DeploymentStatus, Project};
use berth_manifest::ServiceSpec;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe bookkeeping store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SPECS).map_err(map_err!(Table))?;
        txn.open_table(LEDGER).map_err(map_err!(Table))?;
        txn.open_table(AUDIT).map_err(map_err!(Table))?;
        txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Projects ───────────────────────────────────────────────────

    /// Insert or update a project.
    pub fn put_project(&self, project: &Project) -> StateResult<()> {
        let value = serde_json::to_vec(project).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            table
                .insert(project.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project = %project.id, "project stored");
        Ok(())
    }

    /// Get a project by id.
    pub fn get_project(&self, project_id: &str) -> StateResult<Option<Project>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        match table.get(project_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let project: Project =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    /// List all projects on this node.
    pub fn list_projects(&self) -> StateResult<Vec<Project>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let project: Project =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(project);
        }
        Ok(results)
    }

    /// Delete a project and cascade to every bookkeeping row it owns.
    /// Returns true if the project existed.
    pub fn delete_project(&self, project_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            existed = projects.remove(project_id).map_err(map_err!(Write))?.is_some();

            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let deployment_ids =
                remove_prefix(&mut deployments, &format!("{project_id}/"))?
                    .into_iter()
                    .filter_map(|key| key.split_once('/').map(|(_, id)| id.to_string()))
                    .collect::<Vec<_>>();

            let mut specs = txn.open_table(SPECS).map_err(map_err!(Table))?;
            specs.remove(project_id).map_err(map_err!(Write))?;

            let mut ledger = txn.open_table(LEDGER).map_err(map_err!(Table))?;
            remove_prefix(&mut ledger, &format!("{project_id}:"))?;

            let mut audit = txn.open_table(AUDIT).map_err(map_err!(Table))?;
            remove_prefix(&mut audit, &format!("{project_id}:"))?;
            for id in &deployment_ids {
                remove_prefix(&mut audit, &format!("{id}:"))?;
            }

            let mut domains = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
            remove_prefix(&mut domains, &format!("{project_id}/"))?;

            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            counters
                .remove(format!("ledger/{project_id}").as_str())
                .map_err(map_err!(Write))?;
            counters
                .remove(format!("audit/{project_id}").as_str())
                .map_err(map_err!(Write))?;
            for id in &deployment_ids {
                counters
                    .remove(format!("audit/{id}").as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project = %project_id, existed, "project deleted");
        Ok(existed)
    }

    // ── Balance / ledger ───────────────────────────────────────────

    /// Credit a project's balance, pairing the mutation with a ledger
    /// entry in the same transaction.
    pub fn credit(&self, project_id: &str, amount_sats: u64, reason: &str) -> StateResult<BalanceChange> {
        self.apply_balance(project_id, LedgerEntryType::Credit, amount_sats, reason)
    }

    /// Debit a project's balance. The balance may go negative.
    pub fn debit(&self, project_id: &str, amount_sats: u64, reason: &str) -> StateResult<BalanceChange> {
        self.apply_balance(project_id, LedgerEntryType::Debit, amount_sats, reason)
    }

    /// Single atomic read-modify-write of the balance plus an
    /// append-only ledger insert. Concurrent credits and debits
    /// serialize on the write transaction, so no update is lost.
    fn apply_balance(
        &self,
        project_id: &str,
        entry_type: LedgerEntryType,
        amount_sats: u64,
        reason: &str,
    ) -> StateResult<BalanceChange> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let change;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            let mut project: Project = match projects.get(project_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("project {project_id}"))),
            };

            let previous = project.balance_sats;
            let delta = amount_sats as i64;
            project.balance_sats = match entry_type {
                LedgerEntryType::Credit => previous + delta,
                LedgerEntryType::Debit => previous - delta,
            };

            let value = serde_json::to_vec(&project).map_err(map_err!(Serialize))?;
            projects
                .insert(project_id, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let seq = next_seq(&mut counters, &format!("ledger/{project_id}"))?;

            let entry = LedgerEntry {
                project_id: project_id.to_string(),
                seq,
                entry_type,
                amount_sats,
                balance_after: project.balance_sats,
                reason: reason.to_string(),
                created_at: epoch_secs(),
            };
            let entry_value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            let mut ledger = txn.open_table(LEDGER).map_err(map_err!(Table))?;
            ledger
                .insert(format!("{project_id}:{seq:020}").as_str(), entry_value.as_slice())
                .map_err(map_err!(Write))?;

            change = BalanceChange { previous, entry };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            project = %project_id,
            amount = amount_sats,
            balance = change.entry.balance_after,
            "balance updated"
        );
        Ok(change)
    }

    /// Ledger entries for a project, oldest first, capped to the most
    /// recent `limit` entries.
    pub fn list_ledger(&self, project_id: &str, limit: usize) -> StateResult<Vec<LedgerEntry>> {
        let prefix = format!("{project_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEDGER).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let row: LedgerEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(row);
            }
        }
        if results.len() > limit {
            results.drain(..results.len() - limit);
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let key = format!("{}/{}", deployment.project_id, deployment.id);
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a deployment by project and deployment id.
    pub fn get_deployment(
        &self,
        project_id: &str,
        deployment_id: &str,
    ) -> StateResult<Option<Deployment>> {
        let key = format!("{project_id}/{deployment_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List all deployments for a project.
    pub fn list_deployments_for_project(&self, project_id: &str) -> StateResult<Vec<Deployment>> {
        let prefix = format!("{project_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let deployment: Deployment =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(deployment);
            }
        }
        Ok(results)
    }

    /// Advance a deployment's status machine, enforcing one-way
    /// transitions. `error` is recorded when moving to `Failed`.
    pub fn advance_deployment(
        &self,
        project_id: &str,
        deployment_id: &str,
        next: DeploymentStatus,
        error: Option<&str>,
    ) -> StateResult<Deployment> {
        let key = format!("{project_id}/{deployment_id}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => {
                    return Err(StateError::NotFound(format!(
                        "deployment {project_id}/{deployment_id}"
                    )))
                }
            };

            let from = deployment.status.as_str();
            if !deployment.advance(next) {
                return Err(StateError::InvalidTransition {
                    from,
                    to: next.as_str(),
                });
            }
            if next == DeploymentStatus::Failed {
                deployment.error = error.map(|e| e.to_string());
            }

            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = deployment;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment = %deployment_id,
            status = updated.status.as_str(),
            "deployment advanced"
        );
        Ok(updated)
    }

    // ── Specs ──────────────────────────────────────────────────────

    /// Store the last successfully applied spec for a project. The
    /// billing gate uses it to recompute ingress resources.
    pub fn put_spec(&self, project_id: &str, spec: &ServiceSpec) -> StateResult<()> {
        let value = serde_json::to_vec(spec).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SPECS).map_err(map_err!(Table))?;
            table
                .insert(project_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the last successfully applied spec for a project.
    pub fn get_spec(&self, project_id: &str) -> StateResult<Option<ServiceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SPECS).map_err(map_err!(Table))?;
        match table.get(project_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ServiceSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    // ── Audit ──────────────────────────────────────────────────────

    /// Append an event to a feed (project-scoped or deployment-scoped).
    pub fn append_audit(&self, scope: &str, event: &AuditEvent) -> StateResult<u64> {
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            seq = next_seq(&mut counters, &format!("audit/{scope}"))?;
            let mut table = txn.open_table(AUDIT).map_err(map_err!(Table))?;
            table
                .insert(format!("{scope}:{seq:020}").as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// Events for a feed, oldest first, capped to the most recent
    /// `limit` entries.
    pub fn list_audit(&self, scope: &str, limit: usize) -> StateResult<Vec<AuditEvent>> {
        let prefix = format!("{scope}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(AUDIT).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: AuditEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        if results.len() > limit {
            results.drain(..results.len() - limit);
        }
        Ok(results)
    }

    // ── Domains ────────────────────────────────────────────────────

    /// Insert or update a domain verification record.
    pub fn put_domain(&self, record: &DomainRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a domain record by project and hostname.
    pub fn get_domain(&self, project_id: &str, hostname: &str) -> StateResult<Option<DomainRecord>> {
        let key = format!("{project_id}/{hostname}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DomainRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All domain records for a project.
    pub fn list_domains_for_project(&self, project_id: &str) -> StateResult<Vec<DomainRecord>> {
        let prefix = format!("{project_id}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: DomainRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }
}

/// Increment and return the next sequence number for a feed scope.
fn next_seq(
    counters: &mut redb::Table<'_, &'static str, u64>,
    scope: &str,
) -> StateResult<u64> {
    let current = counters
        .get(scope)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    let next = current + 1;
    counters.insert(scope, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Remove every key starting with `prefix`. Returns the removed keys.
fn remove_prefix(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<Vec<String>> {
    let keys: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .filter_map(|entry| {
            let (key, _) = entry.ok()?;
            let k = key.value().to_string();
            k.starts_with(prefix).then_some(k)
        })
        .collect();
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::ChainNetwork;

    fn test_project(id: &str) -> Project {
        Project::new(id, format!("Project {id}"), ChainNetwork::Mutinynet)
    }

    fn test_deployment(project_id: &str, created_at: u64) -> Deployment {
        Deployment::new(project_id, "npub1abc", "/tmp/a.tar.gz", None, created_at)
    }

    // ── Project CRUD ───────────────────────────────────────────────

    #[test]
    fn project_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let project = test_project("p1");

        store.put_project(&project).unwrap();
        let retrieved = store.get_project("p1").unwrap();

        assert_eq!(retrieved, Some(project));
    }

    #[test]
    fn project_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_project("nope").unwrap().is_none());
    }

    #[test]
    fn project_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_project(&test_project("p1")).unwrap();
        store.put_project(&test_project("p2")).unwrap();

        assert_eq!(store.list_projects().unwrap().len(), 2);
    }

    // ── Balance / ledger ───────────────────────────────────────────

    #[test]
    fn credit_and_debit_pair_with_ledger_entries() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_project(&test_project("p1")).unwrap();

        let change = store.credit("p1", 100, "payment").unwrap();
        assert_eq!(change.previous, 0);
        assert_eq!(change.entry.balance_after, 100);
        assert_eq!(change.entry.entry_type, LedgerEntryType::Credit);

        let change = store.debit("p1", 30, "metering").unwrap();
        assert_eq!(change.entry.balance_after, 70);

        let ledger = store.list_ledger("p1", 10).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].seq, 1);
        assert_eq!(ledger[1].seq, 2);
        assert_eq!(store.get_project("p1").unwrap().unwrap().balance_sats, 70);
    }

    #[test]
    fn balance_may_go_negative() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_project(&test_project("p1")).unwrap();

        let change = store.debit("p1", 50, "metering").unwrap();
        assert_eq!(change.entry.balance_after, -50);
        assert!(change.crossed_into_arrears());

        let change = store.credit("p1", 54, "payment").unwrap();
        assert_eq!(change.entry.balance_after, 4);
        assert!(change.crossed_out_of_arrears());
    }

    #[test]
    fn arrears_credit_property() {
        // Balance −1 plus credit 5 → balance 4, one credit entry of 5.
        let store = StateStore::open_in_memory().unwrap();
        let mut project = test_project("p1");
        project.balance_sats = -1;
        store.put_project(&project).unwrap();

        let change = store.credit("p1", 5, "payment").unwrap();
        assert_eq!(change.entry.balance_after, 4);
        assert!(change.crossed_out_of_arrears());

        let ledger = store.list_ledger("p1", 10).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry_type, LedgerEntryType::Credit);
        assert_eq!(ledger[0].amount_sats, 5);
    }

    #[test]
    fn balance_change_on_missing_project_fails() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            store.credit("nope", 1, "payment"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn ledger_limit_keeps_most_recent() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_project(&test_project("p1")).unwrap();
        for i in 0..5 {
            store.credit("p1", i + 1, "payment").unwrap();
        }
        let ledger = store.list_ledger("p1", 2).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].seq, 4);
        assert_eq!(ledger[1].seq, 5);
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployment_put_get_and_list() {
        let store = StateStore::open_in_memory().unwrap();
        let d1 = test_deployment("p1", 1000);
        let d2 = test_deployment("p1", 1001);
        let other = test_deployment("p2", 1000);

        store.put_deployment(&d1).unwrap();
        store.put_deployment(&d2).unwrap();
        store.put_deployment(&other).unwrap();

        assert_eq!(store.get_deployment("p1", &d1.id).unwrap(), Some(d1));
        assert_eq!(store.list_deployments_for_project("p1").unwrap().len(), 2);
        assert_eq!(store.list_deployments_for_project("p2").unwrap().len(), 1);
    }

    #[test]
    fn deployment_advances_through_pipeline() {
        let store = StateStore::open_in_memory().unwrap();
        let d = test_deployment("p1", 1000);
        store.put_deployment(&d).unwrap();

        for next in [
            DeploymentStatus::Uploading,
            DeploymentStatus::Validating,
            DeploymentStatus::Building,
            DeploymentStatus::Provisioning,
            DeploymentStatus::RolledOut,
        ] {
            store.advance_deployment("p1", &d.id, next, None).unwrap();
        }
        let updated = store.get_deployment("p1", &d.id).unwrap().unwrap();
        assert_eq!(updated.status, DeploymentStatus::RolledOut);
    }

    #[test]
    fn deployment_rejects_illegal_transition() {
        let store = StateStore::open_in_memory().unwrap();
        let d = test_deployment("p1", 1000);
        store.put_deployment(&d).unwrap();

        let err = store
            .advance_deployment("p1", &d.id, DeploymentStatus::Provisioning, None)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
    }

    #[test]
    fn deployment_failure_records_summary() {
        let store = StateStore::open_in_memory().unwrap();
        let d = test_deployment("p1", 1000);
        store.put_deployment(&d).unwrap();

        store
            .advance_deployment("p1", &d.id, DeploymentStatus::Uploading, None)
            .unwrap();
        let failed = store
            .advance_deployment("p1", &d.id, DeploymentStatus::Failed, Some("build failed"))
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("build failed"));
    }

    // ── Audit ──────────────────────────────────────────────────────

    #[test]
    fn audit_feeds_are_scoped_and_ordered() {
        let store = StateStore::open_in_memory().unwrap();
        let event = AuditEvent {
            project_id: "p1".to_string(),
            deployment_id: Some("d1".to_string()),
            summary: "deploy failed".to_string(),
            detail: "log output".to_string(),
            created_at: 1000,
        };
        store.append_audit("p1", &event).unwrap();
        store.append_audit("d1", &event).unwrap();
        store.append_audit("p1", &event).unwrap();

        assert_eq!(store.list_audit("p1", 10).unwrap().len(), 2);
        assert_eq!(store.list_audit("d1", 10).unwrap().len(), 1);
        assert!(store.list_audit("other", 10).unwrap().is_empty());
    }

    // ── Domains ────────────────────────────────────────────────────

    #[test]
    fn domain_records_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let record = DomainRecord {
            project_id: "p1".to_string(),
            hostname: "shop.example.com".to_string(),
            role: DomainRole::Frontend,
            state: DomainState::Verified,
            checked_at: 1000,
        };
        store.put_domain(&record).unwrap();

        assert_eq!(
            store.get_domain("p1", "shop.example.com").unwrap(),
            Some(record)
        );
        assert_eq!(store.list_domains_for_project("p1").unwrap().len(), 1);
    }

    // ── Cascade delete ─────────────────────────────────────────────

    #[test]
    fn delete_project_cascades_everywhere() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_project(&test_project("p1")).unwrap();
        let d = test_deployment("p1", 1000);
        store.put_deployment(&d).unwrap();
        store.credit("p1", 10, "payment").unwrap();
        store
            .append_audit(
                "p1",
                &AuditEvent {
                    project_id: "p1".to_string(),
                    deployment_id: None,
                    summary: "created".to_string(),
                    detail: String::new(),
                    created_at: 1000,
                },
            )
            .unwrap();
        store
            .put_domain(&DomainRecord {
                project_id: "p1".to_string(),
                hostname: "shop.example.com".to_string(),
                role: DomainRole::Frontend,
                state: DomainState::Unverified,
                checked_at: 1000,
            })
            .unwrap();

        assert!(store.delete_project("p1").unwrap());
        assert!(store.get_project("p1").unwrap().is_none());
        assert!(store.list_deployments_for_project("p1").unwrap().is_empty());
        assert!(store.list_ledger("p1", 10).unwrap().is_empty());
        assert!(store.list_audit("p1", 10).unwrap().is_empty());
        assert!(store.list_domains_for_project("p1").unwrap().is_empty());
        // Idempotent: second delete reports absence.
        assert!(!store.delete_project("p1").unwrap());
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_project(&test_project("p1")).unwrap();
            store.credit("p1", 42, "payment").unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let project = store.get_project("p1").unwrap().unwrap();
        assert_eq!(project.balance_sats, 42);
        assert_eq!(store.list_ledger("p1", 10).unwrap().len(), 1);
    }
}
