//! redb table definitions for the Berth bookkeeping store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Composite keys follow `{project_id}/{child}` for
//! ownership and `{scope}:{seq}` for append-only feeds.

use redb::TableDefinition;

/// Projects keyed by `{project_id}`.
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// Deployments keyed by `{project_id}/{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Last successfully applied service spec keyed by `{project_id}`.
pub const SPECS: TableDefinition<&str, &[u8]> = TableDefinition::new("specs");

/// Append-only ledger entries keyed by `{project_id}:{seq:020}`.
pub const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger");

/// Audit events keyed by `{scope}:{seq:020}`, where scope is a project
/// id or a deployment id.
pub const AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("audit");

/// Domain verification records keyed by `{project_id}/{hostname}`.
pub const DOMAINS: TableDefinition<&str, &[u8]> = TableDefinition::new("domains");

/// Monotonic sequence counters keyed by feed scope.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
