//! The domain verifier and its DNS seam.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use berth_state::{DomainRecord, DomainRole, DomainState, StateError, StateStore};

/// Subdomain the challenge TXT record must live under.
pub const VERIFICATION_SUBDOMAIN: &str = "_berth-verify";

/// Length of the hex-encoded challenge token.
const TOKEN_LEN: usize = 32;

/// Result type alias for domain verification.
pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// DNS lookup failed. Retryable; the record may simply not have
    /// propagated yet.
    #[error(
        "TXT lookup for {name} failed: {detail}. Publish a TXT record at {name} \
         containing the verification token, wait for propagation, and retry"
    )]
    Lookup { name: String, detail: String },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Challenge token a tenant must publish to prove control of a
/// hostname for the given role.
pub fn verification_token(project_id: &str, role: DomainRole) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b":");
    hasher.update(role.as_str().as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..TOKEN_LEN].to_string()
}

/// DNS TXT resolution seam.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// All TXT strings published at `name`.
    async fn txt(&self, name: &str) -> anyhow::Result<Vec<String>>;
}

/// Production lookup backed by the system resolver.
pub struct DnsTxtLookup {
    resolver: TokioAsyncResolver,
}

impl DnsTxtLookup {
    pub fn from_system_conf() -> anyhow::Result<Self> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }
}

#[async_trait]
impl TxtLookup for DnsTxtLookup {
    async fn txt(&self, name: &str) -> anyhow::Result<Vec<String>> {
        let response = self.resolver.txt_lookup(name.to_string()).await?;
        Ok(response
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data))
                    .collect::<String>()
            })
            .collect())
    }
}

/// Runs TXT challenges and records the outcome.
pub struct DomainVerifier {
    store: StateStore,
    lookup: Arc<dyn TxtLookup>,
}

impl DomainVerifier {
    pub fn new(store: StateStore, lookup: Arc<dyn TxtLookup>) -> Self {
        Self { store, lookup }
    }

    /// Verify `hostname` for a project. A matching token marks the
    /// record `Verified` and stores the hostname on the project; a
    /// present-but-wrong token marks it `Rejected`. Lookup failures
    /// are returned as retryable errors without recording anything.
    pub async fn verify(
        &self,
        project_id: &str,
        hostname: &str,
        role: DomainRole,
    ) -> DomainResult<DomainRecord> {
        validate_hostname(hostname)?;
        let mut project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| StateError::NotFound(format!("project {project_id}")))?;

        let name = format!("{VERIFICATION_SUBDOMAIN}.{hostname}");
        let published = self
            .lookup
            .txt(&name)
            .await
            .map_err(|e| DomainError::Lookup {
                name: name.clone(),
                detail: e.to_string(),
            })?;

        let expected = verification_token(project_id, role);
        let state = if published.iter().any(|t| t.trim() == expected) {
            DomainState::Verified
        } else {
            debug!(hostname = %hostname, "token mismatch");
            DomainState::Rejected
        };

        let record = DomainRecord {
            project_id: project_id.to_string(),
            hostname: hostname.to_string(),
            role,
            state,
            checked_at: epoch_secs(),
        };
        self.store.put_domain(&record)?;

        if state == DomainState::Verified {
            match role {
                DomainRole::Frontend => project.custom_frontend_domain = Some(hostname.to_string()),
                DomainRole::Agent => project.custom_agent_domain = Some(hostname.to_string()),
            }
            self.store.put_project(&project)?;
            info!(project = %project_id, hostname = %hostname, role = role.as_str(), "domain verified");
        }

        Ok(record)
    }
}

/// Reject hostnames that could not be a public DNS name.
fn validate_hostname(hostname: &str) -> DomainResult<()> {
    let valid = hostname.len() <= 253
        && hostname.contains('.')
        && !hostname.starts_with('.')
        && !hostname.ends_with('.')
        && hostname.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidHostname(hostname.to_string()))
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{ChainNetwork, Project};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticLookup {
        records: Mutex<HashMap<String, Vec<String>>>,
        fail: bool,
    }

    impl StaticLookup {
        fn with(name: &str, values: Vec<String>) -> Self {
            let mut map = HashMap::new();
            map.insert(name.to_string(), values);
            Self { records: Mutex::new(map), fail: false }
        }

        fn failing() -> Self {
            Self { records: Mutex::new(HashMap::new()), fail: true }
        }
    }

    #[async_trait]
    impl TxtLookup for StaticLookup {
        async fn txt(&self, name: &str) -> anyhow::Result<Vec<String>> {
            if self.fail {
                anyhow::bail!("no response from nameserver");
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn seeded_store() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_project(&Project::new("proj-1", "Test", ChainNetwork::Mutinynet))
            .unwrap();
        store
    }

    #[test]
    fn tokens_are_stable_and_role_specific() {
        let a = verification_token("proj-1", DomainRole::Frontend);
        let b = verification_token("proj-1", DomainRole::Frontend);
        let c = verification_token("proj-1", DomainRole::Agent);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn matching_token_verifies_and_updates_the_project() {
        let store = seeded_store();
        let token = verification_token("proj-1", DomainRole::Frontend);
        let lookup = StaticLookup::with("_berth-verify.shop.example.com", vec![token]);
        let verifier = DomainVerifier::new(store.clone(), Arc::new(lookup));

        let record = verifier
            .verify("proj-1", "shop.example.com", DomainRole::Frontend)
            .await
            .unwrap();

        assert_eq!(record.state, DomainState::Verified);
        let project = store.get_project("proj-1").unwrap().unwrap();
        assert_eq!(project.custom_frontend_domain.as_deref(), Some("shop.example.com"));
        assert!(store.get_domain("proj-1", "shop.example.com").unwrap().is_some());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_without_touching_the_project() {
        let store = seeded_store();
        let lookup = StaticLookup::with(
            "_berth-verify.shop.example.com",
            vec!["not-the-token".to_string()],
        );
        let verifier = DomainVerifier::new(store.clone(), Arc::new(lookup));

        let record = verifier
            .verify("proj-1", "shop.example.com", DomainRole::Frontend)
            .await
            .unwrap();

        assert_eq!(record.state, DomainState::Rejected);
        let project = store.get_project("proj-1").unwrap().unwrap();
        assert!(project.custom_frontend_domain.is_none());
    }

    #[tokio::test]
    async fn lookup_failure_is_retryable_with_remediation() {
        let store = seeded_store();
        let verifier = DomainVerifier::new(store.clone(), Arc::new(StaticLookup::failing()));

        let err = verifier
            .verify("proj-1", "shop.example.com", DomainRole::Agent)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("_berth-verify.shop.example.com"));
        assert!(message.contains("retry"));
        // Nothing recorded: the next attempt starts fresh.
        assert!(store.get_domain("proj-1", "shop.example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_hostnames_fail_before_any_lookup() {
        let store = seeded_store();
        let verifier = DomainVerifier::new(store, Arc::new(StaticLookup::failing()));

        for bad in ["", "nodot", "UPPER.example.com", "-lead.example.com", "a..b"] {
            let err = verifier
                .verify("proj-1", bad, DomainRole::Frontend)
                .await
                .unwrap_err();
            assert!(matches!(err, DomainError::InvalidHostname(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn agent_role_updates_the_agent_field() {
        let store = seeded_store();
        let token = verification_token("proj-1", DomainRole::Agent);
        let lookup = StaticLookup::with("_berth-verify.api.example.com", vec![token]);
        let verifier = DomainVerifier::new(store.clone(), Arc::new(lookup));

        verifier
            .verify("proj-1", "api.example.com", DomainRole::Agent)
            .await
            .unwrap();

        let project = store.get_project("proj-1").unwrap().unwrap();
        assert_eq!(project.custom_agent_domain.as_deref(), Some("api.example.com"));
        assert!(project.custom_frontend_domain.is_none());
    }
}
