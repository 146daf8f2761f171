//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - Pretty or JSON stdout output
//! - Optional JSON log file in a configured directory

pub mod logger;

pub use logger::LoggerImpl;
