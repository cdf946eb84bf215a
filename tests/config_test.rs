// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_powerseq::config::{Config, FaultLogMode, TelemetryType};
use tempfile::tempdir;

#[test]
fn test_config_load_and_save() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("powerseq.yaml");

    let mut config = Config::default();
    config.fault_log.mode = FaultLogMode::Detail;
    config.fault_log.key = "vmon.fault.log".to_string();
    config.scheduler.poll_interval_secs = 5;
    config.telemetry.telemetry_type = TelemetryType::Log;
    config.watchdog.reset_pin = "HOST_RESET".to_string();

    config.save_to_file(&config_path)?;
    let loaded = Config::from_file(&config_path)?;

    assert_eq!(loaded.fault_log.mode, FaultLogMode::Detail);
    assert_eq!(loaded.fault_log.key, "vmon.fault.log");
    assert_eq!(loaded.scheduler.poll_interval_secs, 5);
    assert_eq!(loaded.telemetry.telemetry_type, TelemetryType::Log);
    assert_eq!(loaded.watchdog.reset_pin, "HOST_RESET");
    assert_eq!(loaded.rails.len(), 10);

    Ok(())
}

#[test]
fn test_missing_file_writes_default() -> Result<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("non_existent.yaml");

    let config = Config::from_file(&path)?;

    assert!(path.exists());
    assert_eq!(config.device.address, 0x7e);
    assert_eq!(config.scheduler.poll_interval_secs, 10);
    assert_eq!(config.scheduler.watchdog_interval_secs, 1);
    assert_eq!(config.watchdog.reset_pin, "BMC_TO_HOST_RST_L");

    // The written default loads back unchanged
    let reloaded = Config::from_file(&path)?;
    assert_eq!(reloaded.rails, config.rails);
    Ok(())
}

#[test]
fn test_invalid_rail_rejected_on_load() -> Result<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("bad_rail.yaml");
    std::fs::write(&path, "rails:\n  vmon.bogus.units.V: 11\n")?;

    let err = Config::from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("vmon.bogus.units.V"));
    Ok(())
}

#[test]
fn test_malformed_yaml_rejected() -> Result<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("malformed.yaml");
    std::fs::write(&path, "scheduler: [not, a, map\n")?;

    assert!(Config::from_file(&path).is_err());
    Ok(())
}
