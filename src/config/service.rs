// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Service-facing configuration: polling cadence, host watchdog defaults,
//! telemetry sink and the inbound write-command listener.

use serde::{Deserialize, Serialize};

/// Polling periods of the daemon loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Voltage and fault log poll period, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Write drain and watchdog tick period, in seconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_watchdog_interval() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            watchdog_interval_secs: default_watchdog_interval(),
        }
    }
}

/// Host watchdog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Initial timeout, in ticks of the fast period
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,

    /// Control line pulsed low to reset the host
    #[serde(default = "default_reset_pin")]
    pub reset_pin: String,

    /// Length of the reset pulse, in milliseconds
    #[serde(default = "default_reset_pulse_ms")]
    pub reset_pulse_ms: u64,

    /// Accepted range of `watchdog.timeout.units.seconds` writes
    #[serde(default = "default_timeout_range")]
    pub timeout_range: [i64; 2],
}

fn default_timeout_seconds() -> u32 {
    30
}

fn default_reset_pin() -> String {
    "BMC_TO_HOST_RST_L".to_string()
}

fn default_reset_pulse_ms() -> u64 {
    100
}

fn default_timeout_range() -> [i64; 2] {
    [1, 3600]
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            reset_pin: default_reset_pin(),
            reset_pulse_ms: default_reset_pulse_ms(),
            timeout_range: default_timeout_range(),
        }
    }
}

/// Telemetry sink selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryType {
    /// Hash fields plus pub/sub notifications on a Redis server
    Redis,
    /// Published pairs are only logged
    Log,
}

/// Telemetry sink settings
///
/// With the Redis sink every published pair is stored as a field of `hash`
/// and announced on `channel` as `key: value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(rename = "type", default = "default_telemetry_type")]
    pub telemetry_type: TelemetryType,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_hash")]
    pub hash: String,

    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_telemetry_type() -> TelemetryType {
    TelemetryType::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_hash() -> String {
    "platina".to_string()
}

fn default_channel() -> String {
    "platina".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            telemetry_type: default_telemetry_type(),
            redis_url: default_redis_url(),
            hash: default_hash(),
            channel: default_channel(),
        }
    }
}

/// Inbound write-command listener
///
/// Lines of the form `SET <field> <value>` or `GET <field>` over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandServerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_command_address")]
    pub address: String,

    #[serde(default = "default_command_port")]
    pub port: u16,
}

fn default_command_address() -> String {
    "127.0.0.1".to_string()
}

fn default_command_port() -> u16 {
    1234
}

impl Default for CommandServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_command_address(),
            port: default_command_port(),
        }
    }
}
