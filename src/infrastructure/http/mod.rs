//! HTTP access to the catalog servers

pub mod client;

pub use client::{HttpCatalogServer, HttpClientConfig};
