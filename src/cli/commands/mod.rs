//! CLI command implementations.

pub mod cleanup;
pub mod config;
pub mod run;
