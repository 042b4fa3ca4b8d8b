//! Satoshi-balance metering and the ingress gate.
//!
//! Each metering window debits every running tenant's balance with a
//! paired ledger entry. A balance crossing below zero withholds the
//! tenant's ingress (the workload keeps running); a credit crossing
//! back to zero or above restores reachability by re-applying only
//! the ingress resources.

pub mod gate;

pub use gate::{cost_for, BillingError, BillingGate, BillingResult, MeteringSource, ResourceUsage};
