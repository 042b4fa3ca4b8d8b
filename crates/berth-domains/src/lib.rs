//! Custom-domain ownership verification over DNS TXT challenges.
//!
//! A tenant proves control of a hostname by publishing a
//! project-specific token at `_berth-verify.{hostname}`. Verified
//! hostnames are stored on the project and picked up by the next
//! topology compile; verification never triggers a re-deploy.

pub mod verify;

pub use verify::{
    verification_token, DnsTxtLookup, DomainError, DomainResult, DomainVerifier, TxtLookup,
    VERIFICATION_SUBDOMAIN,
};
