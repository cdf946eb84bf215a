// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the power sequencer monitor daemon
use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use tokio::signal;

use rust_powerseq::config::Config;
use rust_powerseq::daemon::Daemon;

/// Power sequencer monitor and host watchdog
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file, created with defaults when missing
    #[arg(short, long, default_value = "powerseq.yaml")]
    config: PathBuf,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Override the hardware-access service URL
    #[arg(long)]
    transport_url: Option<String>,

    /// Override the telemetry Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = Config::from_file(&args.config)?;
    if let Some(url) = args.transport_url {
        config.transport.url = url;
    }
    if let Some(url) = args.redis_url {
        config.telemetry.redis_url = url;
    }
    config.validate()?;

    info!("Starting power sequencer monitor");
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal, terminating daemon"),
                Err(err) => error!("Error waiting for shutdown signal: {}", err),
            }
        }
        _ = daemon.stopped() => {
            error!("Power sequencer monitor stopped on a fatal error");
        }
    }

    daemon.shutdown();
    daemon.join().await
}
