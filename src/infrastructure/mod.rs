//! Infrastructure layer module
//!
//! Adapters and external integrations:
//! - HTTP client for the catalog servers
//! - Wire formats of the server API
//! - Fixture files on disk
//! - Configuration management
//! - Logging infrastructure
//! - Terminal progress for fixed waits
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod fixtures;
pub mod http;
pub mod logging;
pub mod progress;
pub mod wire;
