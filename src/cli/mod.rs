//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::errors::HarnessError;

/// Exit code for a failure of the servers under test.
pub const EXIT_TEST_FAILURE: i32 = 1;
/// Exit code for a failure of the harness itself.
pub const EXIT_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "replication-harness")]
#[command(about = "End-to-end replication tests for a primary/secondary catalog server pair", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Load this configuration file instead of replication.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scenario of the configured variant
    Run(commands::run::RunArgs),

    /// Delete fixture objects from both servers by name and class
    Cleanup,

    /// Print the effective configuration
    Config,
}

/// Exit code for an error returned by a command.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HarnessError>() {
        Some(harness_err) if harness_err.is_test_failure() => EXIT_TEST_FAILURE,
        _ => EXIT_ERROR,
    }
}

/// Report `err` and exit.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = exit_code(&err);
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "test_failure": code == EXIT_TEST_FAILURE,
            "error": format!("{err:#}"),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else if code == EXIT_TEST_FAILURE {
        eprintln!("Replication test failed: {err:#}");
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(code);
}
