// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Configuration Management
//!
//! This module implements configuration handling for the power sequencer
//! monitor. Configuration is loaded from and saved to YAML files, then checked
//! by [`utils::validate_specific_rules`].
//!
//! ## Configuration Structure
//!
//! - `transport`: hardware-access service endpoint
//! - `device`: bus location of the power sequencer
//! - `rails`: telemetry key of every monitored rail
//! - `fault_log`: fault log read mode and telemetry key
//! - `scheduler`: slow and fast polling periods
//! - `watchdog`: host watchdog defaults and reset line
//! - `gpio`: control line lookup
//! - `telemetry`: key-value telemetry sink
//! - `recovery`: peripherals re-initialised after a power event
//! - `command_server`: inbound write-command listener
//!
//! ## Usage
//!
//! ```no_run
//! use rust_powerseq::config::Config;
//!
//! // Load config from file, creates a default if not found
//! let config = Config::from_file("powerseq.yaml").unwrap();
//! println!("Polling every {} s", config.scheduler.poll_interval_secs);
//! ```

mod hardware;
mod service;
pub mod utils;

pub use hardware::{
    DeviceConfig, FaultLogConfig, FaultLogMode, GpioConfig, InitWrite, MuxConfig,
    PeripheralConfig, RecoveryConfig, TransportConfig, TransportType,
};
pub use service::{
    CommandServerConfig, SchedulerConfig, TelemetryConfig, TelemetryType, WatchdogConfig,
};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};

/// Root configuration of the power sequencer daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hardware-access service settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Power sequencer bus location
    #[serde(default)]
    pub device: DeviceConfig,

    /// Telemetry key to 1-based rail index
    #[serde(default = "default_rails")]
    pub rails: BTreeMap<String, u8>,

    /// Fault log retrieval settings
    #[serde(default)]
    pub fault_log: FaultLogConfig,

    /// Polling periods
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Host watchdog settings
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Control line lookup
    #[serde(default)]
    pub gpio: GpioConfig,

    /// Telemetry sink settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Power event recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Inbound write-command listener
    #[serde(default)]
    pub command_server: CommandServerConfig,
}

/// Default rail map of the BMC board
fn default_rails() -> BTreeMap<String, u8> {
    [
        ("vmon.5v.sb.units.V", 1),
        ("vmon.3v8.bmc.units.V", 2),
        ("vmon.3v3.sys.units.V", 3),
        ("vmon.3v3.bmc.units.V", 4),
        ("vmon.3v3.sb.units.V", 5),
        ("vmon.1v0.thc.units.V", 6),
        ("vmon.1v8.sys.units.V", 7),
        ("vmon.1v25.sys.units.V", 8),
        ("vmon.1v2.ethx.units.V", 9),
        ("vmon.1v0.tha.units.V", 10),
    ]
    .into_iter()
    .map(|(key, rail)| (key.to_string(), rail))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            device: DeviceConfig::default(),
            rails: default_rails(),
            fault_log: FaultLogConfig::default(),
            scheduler: SchedulerConfig::default(),
            watchdog: WatchdogConfig::default(),
            gpio: GpioConfig::default(),
            telemetry: TelemetryConfig::default(),
            recovery: RecoveryConfig::default(),
            command_server: CommandServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// When the file does not exist, a default configuration is written to
    /// `path` and returned.
    ///
    /// ### Errors
    ///
    /// Fails when the file cannot be read, is not valid YAML for [`Config`],
    /// or breaks one of the rules of [`utils::validate_specific_rules`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let config: Config = serde_yml::from_str(&contents).map_err(|err| {
            error!("Configuration deserialization error: {}", err);
            anyhow::anyhow!(
                "Failed to deserialize configuration from {}: {}",
                path.display(),
                err
            )
        })?;

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        utils::validate_specific_rules(self)
    }

    /// Rails sorted by index, as (telemetry key, rail index)
    pub fn rails_by_index(&self) -> Vec<(String, u8)> {
        let mut rails: Vec<(String, u8)> = self
            .rails
            .iter()
            .map(|(key, rail)| (key.clone(), *rail))
            .collect();
        rails.sort_by_key(|(key, rail)| (*rail, key.clone()));
        rails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rails.len(), 10);
        assert_eq!(config.rails_by_index()[0].0, "vmon.5v.sb.units.V");
        assert_eq!(config.rails_by_index()[9].1, 10);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "device:\n  bus: 2\n  address: 126\n";
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.device.bus, 2);
        assert_eq!(config.watchdog.timeout_seconds, 30);
        assert_eq!(config.scheduler.poll_interval_secs, 10);
        assert_eq!(config.rails.len(), 10);
    }
}
