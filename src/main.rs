//! giftlink - turn live-stream gifts into LED, servo, sound and
//! microcontroller actions.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use giftlink::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output and JSON lines
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path: PathBuf = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_with_env(&config_path)?;

    match cli.command {
        // === Serial ===
        Commands::Ports => commands::serial::ports(&config),
        Commands::Probe { port, baud } => commands::serial::probe(&config, &port, baud).await,
        Commands::Send {
            port,
            command,
            baud,
        } => commands::serial::send(&config, &port, &command, baud).await,

        // === Engine ===
        Commands::Gifts => commands::engine::gifts(&config),
        Commands::Simulate { gift, sender } => {
            commands::engine::simulate(&config, &gift, &sender).await
        }
        Commands::Run => commands::engine::run(&config).await,
        Commands::SelfTest => commands::engine::self_test(&config).await,
        Commands::InitConfig { force } => {
            commands::engine::init_config(&config, &config_path, force)
        }
    }
}
