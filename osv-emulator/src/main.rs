//! OSV datastore emulator runner
//!
//! Starts the emulator the same way the test harness does and prints the
//! environment a service needs to reach it, or sends control requests to
//! one that is already running.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use osv_testkit::config::{ControlSettings, HarnessSettings};
use osv_testkit::emulator::{ControlClient, EmulatorConfig, EmulatorHandle};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "osv-emulator")]
#[command(author, version, about = "Run and control the OSV test datastore emulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the emulator and keep it running until Ctrl-C
    Run {
        /// Port to listen on (defaults to DATASTORE_EMULATOR_PORT or 8002)
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds to wait for the emulator to report readiness
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Wipe all data in a running emulator
    Reset {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a running emulator to exit
    Shutdown {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { port, timeout_secs } => {
            let settings = HarnessSettings::from_env()
                .map_err(osv_testkit::Error::from)
                .context("Failed to read emulator settings")?;
            let mut config = EmulatorConfig::from_settings(&settings);
            if let Some(port) = port {
                config = config.with_port(port);
            }
            if let Some(secs) = timeout_secs {
                config = config.with_startup_timeout(Duration::from_secs(secs));
            }
            run(config).await
        }
        Commands::Reset { port } => {
            let client = control_client(&control_settings()?, port);
            tokio::task::spawn_blocking(move || client.reset())
                .await?
                .context("Emulator reset failed")?;
            info!("Emulator data reset");
            Ok(())
        }
        Commands::Shutdown { port } => {
            let client = control_client(&control_settings()?, port);
            tokio::task::spawn_blocking(move || client.shutdown())
                .await?
                .context("Emulator shutdown failed")?;
            info!("Emulator shutdown requested");
            Ok(())
        }
    }
}

fn control_settings() -> Result<ControlSettings> {
    ControlSettings::from_env()
        .map_err(osv_testkit::Error::from)
        .context("Failed to read emulator control settings")
}

fn control_client(settings: &ControlSettings, port: Option<u16>) -> ControlClient {
    ControlClient::new(
        &EmulatorConfig::default().host,
        port.unwrap_or(settings.emulator_port.value),
        settings.control_timeout.value,
    )
}

async fn run(config: EmulatorConfig) -> Result<()> {
    let host_port = config.host_port();
    info!("Starting datastore emulator on {}", host_port);

    let mut handle = tokio::task::spawn_blocking(move || EmulatorHandle::start(config))
        .await?
        .with_context(|| format!("Failed to start emulator on {host_port}"))?;

    info!(pid = handle.pid(), "Emulator ready; press Ctrl-C to stop");
    print!("{}", handle.environment().export_lines());

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Stopping emulator");
    tokio::task::spawn_blocking(move || handle.stop())
        .await?
        .context("Failed to stop emulator")?;
    Ok(())
}
