//! Replication harness CLI entry point.

use clap::Parser;

use replication_harness::cli::{commands, handle_error, Cli, Commands};
use replication_harness::infrastructure::config::ConfigLoader;
use replication_harness::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let Cli {
        config,
        json,
        command,
    } = Cli::parse();

    let config = match config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(err, json),
    };

    let logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, json),
    };

    let result = match command {
        Commands::Run(args) => commands::run::execute(args, config, json).await,
        Commands::Cleanup => commands::cleanup::execute(config, json).await,
        Commands::Config => commands::config::execute(&config, json),
    };

    // Flush the file log before a possible exit.
    drop(logger);
    if let Err(err) = result {
        handle_error(err, json);
    }
}
