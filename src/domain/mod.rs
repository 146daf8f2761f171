//! Domain layer for the replication harness
//!
//! Object identity, the upload ledger, catalog snapshots, attribute
//! comparison and the port to the remote servers.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{HarnessError, HarnessResult};
