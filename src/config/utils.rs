// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! Rules that serde cannot express: value ranges, cross-field consistency and
//! address syntax.

use anyhow::Result;
use log::debug;
use std::collections::BTreeSet;

use super::{Config, PeripheralConfig};
use crate::power_sequencer::RAIL_COUNT;

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Check that a value fits a 7-bit I2C address
fn is_valid_i2c_address(address: i32) -> bool {
    (0..=0x7f).contains(&address)
}

fn validate_peripheral(section: &str, peripheral: &PeripheralConfig) -> Result<()> {
    if !is_valid_i2c_address(peripheral.address) {
        anyhow::bail!(
            "recovery.{}: address 0x{:x} is not a 7-bit I2C address",
            section,
            peripheral.address
        );
    }
    if let Some(mux) = &peripheral.mux {
        if !is_valid_i2c_address(mux.address) {
            anyhow::bail!(
                "recovery.{}: mux address 0x{:x} is not a 7-bit I2C address",
                section,
                mux.address
            );
        }
    }
    Ok(())
}

/// Validates the configuration against additional rules
///
/// # Arguments
///
/// * `config` - The configuration object to validate
///
/// # Returns
///
/// * `Ok(())` if all validations pass
/// * `Err(anyhow::Error)` with descriptive message if any validation fails
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Validating configuration specific rules");

    if !config.transport.url.starts_with("http://") && !config.transport.url.starts_with("https://")
    {
        anyhow::bail!(
            "transport.url must be an http(s) URL, got '{}'",
            config.transport.url
        );
    }

    if !is_valid_i2c_address(config.device.address) {
        anyhow::bail!(
            "device.address 0x{:x} is not a 7-bit I2C address",
            config.device.address
        );
    }

    let mut seen = BTreeSet::new();
    for (key, rail) in &config.rails {
        if *rail < 1 || *rail > RAIL_COUNT {
            anyhow::bail!(
                "rails.{}: rail index {} is outside 1..={}",
                key,
                rail,
                RAIL_COUNT
            );
        }
        if !seen.insert(*rail) {
            anyhow::bail!("rails.{}: rail index {} is mapped twice", key, rail);
        }
    }

    if config.fault_log.key.is_empty() {
        anyhow::bail!("fault_log.key must not be empty");
    }

    if config.scheduler.poll_interval_secs == 0 || config.scheduler.watchdog_interval_secs == 0 {
        anyhow::bail!("scheduler periods must be at least one second");
    }

    let [lo, hi] = config.watchdog.timeout_range;
    if lo < 1 || lo > hi {
        anyhow::bail!(
            "watchdog.timeout_range [{}, {}] must be ordered and start at 1 or above",
            lo,
            hi
        );
    }
    if hi > i64::from(u32::MAX) {
        anyhow::bail!(
            "watchdog.timeout_range upper bound {} exceeds {} seconds",
            hi,
            u32::MAX
        );
    }
    let timeout = i64::from(config.watchdog.timeout_seconds);
    if timeout < lo || timeout > hi {
        anyhow::bail!(
            "watchdog.timeout_seconds {} is outside [{}, {}]",
            timeout,
            lo,
            hi
        );
    }
    if config.watchdog.reset_pin.is_empty() {
        anyhow::bail!("watchdog.reset_pin must not be empty");
    }

    validate_peripheral("fan_controller", &config.recovery.fan_controller)?;
    validate_peripheral("fan_tray", &config.recovery.fan_tray)?;
    validate_peripheral("front_panel", &config.recovery.front_panel)?;
    if !is_valid_i2c_address(config.recovery.front_panel_address_legacy) {
        anyhow::bail!(
            "recovery.front_panel_address_legacy 0x{:x} is not a 7-bit I2C address",
            config.recovery.front_panel_address_legacy
        );
    }

    if config.command_server.enabled && !is_valid_ip_address(&config.command_server.address) {
        anyhow::bail!(
            "command_server.address '{}' is not a valid IP address",
            config.command_server.address
        );
    }

    Ok(())
}
