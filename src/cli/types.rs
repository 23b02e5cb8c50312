//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{beam::BeamArgs, search::SearchArgs, stats::StatsArgs};

#[derive(Parser, Debug)]
#[command(name = "arborist")]
#[command(about = "Arborist - tree-structured program search", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to .arborist/config.yaml and .arborist/local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the search loop
    Search(SearchArgs),

    /// Show the best programs of a version
    Beam(BeamArgs),

    /// Show tree and reward statistics
    Stats(StatsArgs),
}
