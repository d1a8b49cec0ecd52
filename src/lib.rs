//! Rent escrow & reconciliation service.
//!
//! Settles rent payments between tenants and landlords through a custodial
//! escrow held on an external ledger, and keeps a local queryable record of
//! every payment's lifecycle in sync with ledger truth. The reconciliation
//! engine provides exactly-once settlement semantics over an asynchronous,
//! eventually-consistent external network.

pub mod adapters;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod notifier;
pub mod reconciliation;
pub mod server;
