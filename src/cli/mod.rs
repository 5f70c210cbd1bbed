//! CLI interface using clap

mod commands;

pub use commands::*;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ragline - local document watching and retrieval pipeline
#[derive(Parser, Debug)]
#[command(name = "ragline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "RAGLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch configured workspaces and index changes continuously
    Watch(WatchArgs),

    /// Scan workspaces once: reconcile and process pending documents
    Scan(ScanArgs),

    /// Query a workspace for relevant document chunks
    Query(QueryArgs),

    /// Show tracking status per workspace
    Status(StatusArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for watch command
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Watch only this workspace (defaults to all configured)
    #[arg(short, long)]
    pub workspace: Option<String>,
}

/// Arguments for scan command
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Scan only this workspace (defaults to all configured)
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Reconcile only; skip processing pending documents
    #[arg(long)]
    pub no_process: bool,
}

/// Arguments for query command
#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// Workspace to query
    #[arg(short, long)]
    pub workspace: String,

    /// Query text
    pub text: String,

    /// Number of results (defaults to the configured top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum similarity (defaults to the configured threshold)
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Only return chunks with this importance level
    #[arg(short, long)]
    pub importance: Option<String>,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Show only this workspace
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// List individual documents, including error messages
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Write the effective configuration to the config path
    #[arg(long)]
    pub init: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
