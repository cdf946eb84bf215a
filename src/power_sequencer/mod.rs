// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Power Sequencer Monitoring
//!
//! Slow-cadence telemetry of the UCD9090 power sequencer: one voltage per
//! monitored rail and a summary of the logged fault ring buffer.
//!
//! [`PowerSequencer`] binds the declared rail map and the device location to
//! the stateful [`FaultLogEngine`]. All register traffic goes through a
//! caller-owned [`BatchedClient`].

pub mod fault_log;
pub mod voltage;

pub use fault_log::{
    classify, rail_name, DedupFingerprint, FaultLogEngine, FaultLogEntry, DETAIL_RECORD_LEN,
    FINGERPRINT_LEN,
};
pub use voltage::{decode_voltage, exponent_from_mode, read_voltage, RAIL_COUNT};

use crate::config::{Config, FaultLogMode};
use crate::error::MonitorResult;
use crate::recovery::RecoveryCascade;
use crate::registers::DeviceHandle;
use crate::transport::BatchedClient;

/// Monitored power sequencer
#[derive(Debug)]
pub struct PowerSequencer {
    device: DeviceHandle,
    /// (telemetry key, 1-based rail), in rail order
    rails: Vec<(String, u8)>,
    fault_log: FaultLogEngine,
    fault_log_mode: FaultLogMode,
    fault_log_key: String,
}

impl PowerSequencer {
    pub fn new(
        device: DeviceHandle,
        rails: Vec<(String, u8)>,
        fault_log_mode: FaultLogMode,
        fault_log_key: String,
    ) -> Self {
        Self {
            device,
            rails,
            fault_log: FaultLogEngine::new(),
            fault_log_mode,
            fault_log_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            DeviceHandle::new(config.device.bus, config.device.address),
            config.rails_by_index(),
            config.fault_log.mode,
            config.fault_log.key.clone(),
        )
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Address 0 means no sequencer is fitted
    pub fn is_present(&self) -> bool {
        self.device.address != 0
    }

    pub fn fault_log_key(&self) -> &str {
        &self.fault_log_key
    }

    pub fn fault_log(&self) -> &FaultLogEngine {
        &self.fault_log
    }

    /// Read every rail, stopping at the first failure
    pub async fn read_rails(
        &self,
        client: &mut BatchedClient,
    ) -> MonitorResult<Vec<(String, f64)>> {
        let mut readings = Vec::with_capacity(self.rails.len());
        for (key, rail) in &self.rails {
            let volts = read_voltage(client, &self.device, *rail).await?;
            readings.push((key.clone(), volts));
        }
        Ok(readings)
    }

    /// Retrieve the fault log summary; empty when nothing new was logged
    pub async fn read_fault_log(
        &mut self,
        client: &mut BatchedClient,
        recovery: Option<&mut RecoveryCascade>,
    ) -> MonitorResult<String> {
        self.fault_log
            .retrieve(client, &self.device, self.fault_log_mode, recovery)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockSequencer, MockTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_rails_in_index_order() {
        let sequencer = MockSequencer::new();
        for rail in 1..=RAIL_COUNT {
            // nibble 5 -> exponent -11, 2048 per volt
            sequencer.set_rail(rail, 0x15, u16::from(rail) * 2048);
        }
        let mut client = BatchedClient::new(
            Box::new(MockTransport::new(sequencer.clone())),
            Duration::ZERO,
        );
        let monitor = PowerSequencer::from_config(&Config::default());

        let readings = monitor.read_rails(&mut client).await.unwrap();
        assert_eq!(readings.len(), 10);
        assert_eq!(readings[0], ("vmon.5v.sb.units.V".to_string(), 1.0));
        assert_eq!(readings[9], ("vmon.1v0.tha.units.V".to_string(), 10.0));
        assert_eq!(sequencer.batches().len(), 10);
    }

    #[test]
    fn test_absent_device() {
        let monitor = PowerSequencer::new(
            DeviceHandle::new(0, 0),
            Vec::new(),
            FaultLogMode::Detail,
            "vmon.poweroff.events".to_string(),
        );
        assert!(!monitor.is_present());
    }
}
