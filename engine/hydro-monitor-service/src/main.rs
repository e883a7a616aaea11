//! Hydro Monitor Service
//!
//! Replays rainfall and discharge records against a simulated clock and
//! publishes the consolidated view with a derived flood alert.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use hydro_monitor_service::config::{render_json, save_config};
use hydro_monitor_service::{
    graceful_shutdown, initialize_logging, load_config, setup_signal_handlers, ConfigOverrides,
    ServiceState, DEFAULT_CONFIG_FILE,
};

#[derive(Parser, Debug)]
#[command(name = "hydro-monitor", version, about = "Rainfall and discharge replay with flood alerts")]
struct Cli {
    /// Configuration file (TOML); optional unless given explicitly
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Virtual start time, DD/MM/YYYY HH:MM:SS or YYYY-MM-DD HH:MM:SS
    #[arg(long)]
    start: Option<String>,

    /// Simulation speed multiplier
    #[arg(long)]
    speed: Option<u32>,

    #[arg(long)]
    rainfall_csv: Option<PathBuf>,

    #[arg(long)]
    discharge_csv: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration as TOML to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        start: cli.start,
        speed: cli.speed,
        rainfall_csv: cli.rainfall_csv,
        discharge_csv: cli.discharge_csv,
        log_level: cli.log_level,
    };
    let (path, required) = match cli.config {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let config = load_config(&path, required, &overrides).context("Failed to load configuration")?;

    if cli.print_config {
        println!("{}", render_json(&config)?);
        return Ok(());
    }
    if let Some(target) = cli.write_config {
        save_config(&config, &target)?;
        println!("Configuration written to {}", target.display());
        return Ok(());
    }

    let _log_guard = initialize_logging(&config.logging)?;
    info!("Starting Hydro Monitor Service v{}", env!("CARGO_PKG_VERSION"));

    let mut service_state = ServiceState::new(config)?;
    setup_signal_handlers(service_state.cancel_token())?;
    info!("Signal handlers configured");

    let tasks = service_state.start()?;
    info!("Hydro Monitor Service is running. Press Ctrl+C to shutdown gracefully.");

    service_state.cancel_token().cancelled().await;

    info!("Shutdown signal received. Initiating graceful shutdown...");
    graceful_shutdown(&service_state, tasks).await?;

    info!("Hydro Monitor Service shutdown complete");
    Ok(())
}
