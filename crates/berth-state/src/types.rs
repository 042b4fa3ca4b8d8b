//! Persisted bookkeeping types: ledger entries, audit events, and
//! domain verification records.

use serde::{Deserialize, Serialize};

use berth_core::ProjectId;

// ── Ledger ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Credit,
    Debit,
}

/// Append-only balance-change record. The balance is never mutated
/// without one of these in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub project_id: ProjectId,
    pub seq: u64,
    pub entry_type: LedgerEntryType,
    pub amount_sats: u64,
    pub balance_after: i64,
    pub reason: String,
    pub created_at: u64,
}

/// Result of an atomic balance mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    /// Balance before the mutation.
    pub previous: i64,
    pub entry: LedgerEntry,
}

impl BalanceChange {
    /// The mutation pushed the balance from non-negative to negative.
    pub fn crossed_into_arrears(&self) -> bool {
        self.previous >= 0 && self.entry.balance_after < 0
    }

    /// The mutation restored the balance from negative to non-negative.
    pub fn crossed_out_of_arrears(&self) -> bool {
        self.previous < 0 && self.entry.balance_after >= 0
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// One entry in a project-level or deployment-level audit feed.
///
/// `detail` holds bounded diagnostics (build logs, apply output);
/// `summary` is the short form surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    pub summary: String,
    pub detail: String,
    pub created_at: u64,
}

// ── Domains ───────────────────────────────────────────────────────

/// Whether a custom hostname routes to the frontend or the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRole {
    Frontend,
    Agent,
}

impl DomainRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainRole::Frontend => "frontend",
            DomainRole::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Unverified,
    Verified,
    Rejected,
}

/// Verification record for one candidate custom hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub project_id: ProjectId,
    pub hostname: String,
    pub role: DomainRole,
    pub state: DomainState,
    /// Unix timestamp of the last verification attempt.
    pub checked_at: u64,
}

impl DomainRecord {
    /// Build the composite key for the domains table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.project_id, self.hostname)
    }
}
