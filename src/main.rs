//! Arborist CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use arborist::cli::commands::{beam, load_config, search, stats};
use arborist::cli::{handle_error, Cli, Commands};
use arborist::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let _logger = LoggerImpl::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Search(args) => search::execute(args, config, cli.json).await,
        Commands::Beam(args) => beam::execute(args, config, cli.json).await,
        Commands::Stats(args) => stats::execute(args, config, cli.json).await,
    }
}
