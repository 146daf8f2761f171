//! Port trait definitions (Hexagonal Architecture)
//!
//! - `CatalogServer`: the remote primary/secondary server operations
//!
//! The convergence engine's own seam, `SnapshotSource`, lives with the engine
//! in `services::convergence`.

pub mod catalog_server;

pub use catalog_server::{CatalogServer, MetadataUpdate, ObjectUpload, RemoteResponse};
