//! Ragline - local document watching and retrieval pipeline
//!
//! Watches workspaces for document changes, indexes their text into an
//! embedded vector store, and serves similarity queries for prompt
//! enhancement.

use anyhow::Result;
use ragline::cli::{
    cmd_config, cmd_query, cmd_scan, cmd_status, cmd_watch, Cli, Commands,
};
use ragline::config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = AppConfig::load_or_default(&config_path)?;

    // Execute command
    match cli.command {
        Commands::Watch(args) => cmd_watch(&config, &args)?,
        Commands::Scan(args) => cmd_scan(&config, &args, cli.format)?,
        Commands::Query(args) => cmd_query(&config, &args, cli.format)?,
        Commands::Status(args) => cmd_status(&config, &args, cli.format)?,
        Commands::Config(args) => cmd_config(&config, &config_path, args.init, cli.format)?,
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ragline")
        .join("config.toml")
}
