//! QMK Layer Bridge CLI
//!
//! Polls a VIA keyboard for its active layer and relays changes to a desktop
//! indicator, through a Unix-socket bridge when the poller runs as root.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qmk_layer_bridge::Config;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    info!("Loading config from {:?}", config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Commands::Poll { mode } => commands::poll::run(&config, mode).await,
        Commands::Bridge => commands::bridge::run(&config).await,
        Commands::List { all } => commands::list::run(&config, all),
        Commands::Layer => commands::layer::run(&config),
        Commands::IndicatorTest => commands::indicator::test(&config).await,
        Commands::ServeIndicator => commands::indicator::serve(&config).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
