// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hardware-facing configuration
//!
//! Bus locations of the power sequencer and of the peripherals that share its
//! rails, the hardware-access service endpoint, and the control line lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hardware transport driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// JSON batches posted to the local hardware-access service
    Http,
    /// In-process simulated sequencer, for development and tests
    Mock,
}

/// Hardware-access service settings
///
/// # Example
///
/// ```
/// use rust_powerseq::config::{TransportConfig, TransportType};
///
/// let transport = TransportConfig {
///     transport_type: TransportType::Mock,
///     ..Default::default()
/// };
/// assert_eq!(transport.settle_delay_ms, 50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Driver used to reach the bus
    #[serde(rename = "type", default = "default_transport_type")]
    pub transport_type: TransportType,

    /// Batch endpoint of the hardware-access service
    #[serde(default = "default_transport_url")]
    pub url: String,

    /// Pause after the first connection, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_transport_type() -> TransportType {
    TransportType::Http
}

fn default_transport_url() -> String {
    "http://127.0.0.1:1233/i2c".to_string()
}

fn default_settle_delay_ms() -> u64 {
    50
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: default_transport_type(),
            url: default_transport_url(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// I2C multiplexer channel selection in front of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    pub bus: i32,
    pub address: i32,
    /// Channel mask written to the multiplexer
    pub value: u8,
}

/// Bus location of the power sequencer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub bus: i32,

    /// Address 0 disables polling
    pub address: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            address: 0x7e,
        }
    }
}

/// Output produced by the fault log engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultLogMode {
    /// Dot-separated timestamps of power-loss events
    PowerCycles,
    /// One `timestamp.rail.fault` line per logged fault
    Detail,
}

/// Fault log retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultLogConfig {
    #[serde(default = "default_fault_log_mode")]
    pub mode: FaultLogMode,

    /// Telemetry key of the fault log summary
    #[serde(default = "default_fault_log_key")]
    pub key: String,
}

fn default_fault_log_mode() -> FaultLogMode {
    FaultLogMode::PowerCycles
}

fn default_fault_log_key() -> String {
    "vmon.poweroff.events".to_string()
}

impl Default for FaultLogConfig {
    fn default() -> Self {
        Self {
            mode: default_fault_log_mode(),
            key: default_fault_log_key(),
        }
    }
}

/// Control line lookup
///
/// Named lines are driven through the sysfs GPIO interface under
/// `sysfs_root`. A name missing from `pins` is reported as absent hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,

    /// Line name to GPIO number
    #[serde(default)]
    pub pins: BTreeMap<String, u32>,
}

fn default_sysfs_root() -> String {
    "/sys/class/gpio".to_string()
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            pins: BTreeMap::new(),
        }
    }
}

/// One register write of a peripheral init sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitWrite {
    pub offset: u8,
    pub value: u8,
}

/// Peripheral re-initialised after a power event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralConfig {
    /// Name used in log messages
    pub name: String,
    pub bus: i32,
    pub address: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<MuxConfig>,
    /// Register writes replayed in order on re-init
    #[serde(default)]
    pub init: Vec<InitWrite>,
}

/// Expander port configuration: every line an output
fn led_expander_init() -> Vec<InitWrite> {
    vec![
        InitWrite {
            offset: 0x06,
            value: 0x00,
        },
        InitWrite {
            offset: 0x07,
            value: 0x00,
        },
    ]
}

/// Power event recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pause between the power event warning and the first re-init
    #[serde(default = "default_recovery_settle_secs")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_fan_controller")]
    pub fan_controller: PeripheralConfig,

    #[serde(default = "default_fan_tray")]
    pub fan_tray: PeripheralConfig,

    /// Front panel LED expander; `address` is the one of current boards
    #[serde(default = "default_front_panel")]
    pub front_panel: PeripheralConfig,

    /// Front panel address of boards with revision 0 or 0xff
    #[serde(default = "default_front_panel_legacy_address")]
    pub front_panel_address_legacy: i32,

    /// Telemetry key holding the board revision
    #[serde(default = "default_device_version_key")]
    pub device_version_key: String,
}

fn default_true() -> bool {
    true
}

fn default_recovery_settle_secs() -> u64 {
    5
}

fn default_fan_controller() -> PeripheralConfig {
    PeripheralConfig {
        name: "fan controller".to_string(),
        bus: 11,
        address: 0x2f,
        mux: None,
        // Bank 0, then start fan monitoring
        init: vec![
            InitWrite {
                offset: 0x00,
                value: 0x80,
            },
            InitWrite {
                offset: 0x01,
                value: 0x1d,
            },
        ],
    }
}

fn default_fan_tray() -> PeripheralConfig {
    PeripheralConfig {
        name: "fan tray LEDs".to_string(),
        bus: 1,
        address: 0x20,
        mux: Some(MuxConfig {
            bus: 1,
            address: 0x72,
            value: 0x04,
        }),
        init: led_expander_init(),
    }
}

fn default_front_panel() -> PeripheralConfig {
    PeripheralConfig {
        name: "front panel LEDs".to_string(),
        bus: 5,
        address: 0x75,
        mux: None,
        init: led_expander_init(),
    }
}

fn default_front_panel_legacy_address() -> i32 {
    0x22
}

fn default_device_version_key() -> String {
    "eeprom.DeviceVersion".to_string()
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_delay_secs: default_recovery_settle_secs(),
            fan_controller: default_fan_controller(),
            fan_tray: default_fan_tray(),
            front_panel: default_front_panel(),
            front_panel_address_legacy: default_front_panel_legacy_address(),
            device_version_key: default_device_version_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_field_name() {
        let yaml = "type: mock\n";
        let transport: TransportConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(transport.transport_type, TransportType::Mock);
        assert_eq!(transport.url, "http://127.0.0.1:1233/i2c");
    }

    #[test]
    fn test_recovery_defaults() {
        let recovery = RecoveryConfig::default();
        assert_eq!(recovery.fan_controller.bus, 11);
        assert_eq!(recovery.fan_controller.address, 0x2f);
        let mux = recovery.fan_tray.mux.unwrap();
        assert_eq!((mux.bus, mux.address, mux.value), (1, 0x72, 0x04));
        assert_eq!(recovery.front_panel.bus, 5);
        assert_eq!(recovery.front_panel_address_legacy, 0x22);
    }

    #[test]
    fn test_fault_log_mode_names() {
        let config: FaultLogConfig = serde_yml::from_str("mode: detail\n").unwrap();
        assert_eq!(config.mode, FaultLogMode::Detail);
        assert_eq!(config.key, "vmon.poweroff.events");
    }
}
