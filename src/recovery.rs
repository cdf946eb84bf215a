// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Power event recovery
//!
//! A new fault log head after the baseline read means the board went
//! through a power event. Controllers sharing the affected rails may have
//! lost their configuration, so each one is re-initialised in turn by
//! replaying its init register writes.
//!
//! The front panel LED expander moved between board revisions; its address
//! is chosen from the revision published under `eeprom.DeviceVersion`.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::time::Duration;

use crate::config::{InitWrite, MuxConfig, PeripheralConfig, RecoveryConfig, TransportConfig};
use crate::registers::DeviceHandle;
use crate::telemetry::TelemetrySink;
use crate::transport::{BatchedClient, TransferWidth};

/// Peripheral that can be brought back after a power event
#[async_trait::async_trait]
pub trait RecoverablePeripheral: Send + Sync {
    fn name(&self) -> &str;

    async fn reinit(&mut self) -> Result<()>;
}

/// Peripheral re-initialised by a fixed list of byte register writes
pub struct RegisterPeripheral {
    name: String,
    device: DeviceHandle,
    mux: Option<MuxConfig>,
    init: Vec<InitWrite>,
    client: BatchedClient,
}

impl RegisterPeripheral {
    pub fn new(config: &PeripheralConfig, client: BatchedClient) -> Self {
        Self {
            name: config.name.clone(),
            device: DeviceHandle::new(config.bus, config.address),
            mux: config.mux,
            init: config.init.clone(),
            client,
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn set_address(&mut self, address: i32) {
        self.device.address = address;
    }
}

#[async_trait::async_trait]
impl RecoverablePeripheral for RegisterPeripheral {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reinit(&mut self) -> Result<()> {
        self.client.clear();
        if let Some(mux) = self.mux {
            self.client
                .enqueue_write(mux.bus, mux.address, 0, TransferWidth::Byte, &[mux.value])?;
        }
        for write in &self.init {
            self.client.enqueue_write(
                self.device.bus,
                self.device.address,
                write.offset,
                TransferWidth::Byte,
                &[write.value],
            )?;
        }
        debug!(
            "Replaying {} init writes on {} at {}:0x{:02x}",
            self.init.len(),
            self.name,
            self.device.bus,
            self.device.address
        );
        if let Err(e) = self.client.dispatch().await {
            self.client.clear();
            return Err(e).with_context(|| format!("Failed to re-init {}", self.name));
        }
        Ok(())
    }
}

/// Front panel address for a board revision
///
/// Revisions 0 and 0xff, as well as a missing or unreadable revision, select
/// the legacy address.
pub fn front_panel_address(version: Option<&str>, legacy: i32, current: i32) -> i32 {
    let parsed = version.and_then(|v| {
        let v = v.trim();
        match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16).ok(),
            None => v.parse::<i64>().ok(),
        }
    });
    match parsed {
        None | Some(0) | Some(0xff) => legacy,
        Some(_) => current,
    }
}

/// Front panel LEDs, addressed by board revision
pub struct FrontPanelLeds {
    leds: RegisterPeripheral,
    legacy_address: i32,
    current_address: i32,
    version_key: String,
    versions: Box<dyn TelemetrySink>,
}

impl FrontPanelLeds {
    /// # Arguments
    /// * `config` - Peripheral record; its address is the current-board one
    /// * `legacy_address` - Address on revision 0 / 0xff boards
    /// * `version_key` - Telemetry key of the board revision
    /// * `versions` - Source of the board revision
    pub fn new(
        config: &PeripheralConfig,
        client: BatchedClient,
        legacy_address: i32,
        version_key: &str,
        versions: Box<dyn TelemetrySink>,
    ) -> Self {
        Self {
            leds: RegisterPeripheral::new(config, client),
            legacy_address,
            current_address: config.address,
            version_key: version_key.to_string(),
            versions,
        }
    }
}

#[async_trait::async_trait]
impl RecoverablePeripheral for FrontPanelLeds {
    fn name(&self) -> &str {
        self.leds.name()
    }

    async fn reinit(&mut self) -> Result<()> {
        let version = match self.versions.get(&self.version_key).await {
            Ok(version) => version,
            Err(e) => {
                debug!("Board revision unavailable: {}", e);
                None
            }
        };
        let address =
            front_panel_address(version.as_deref(), self.legacy_address, self.current_address);
        self.leds.set_address(address);
        self.leds.reinit().await
    }
}

/// Ordered re-init of every recoverable peripheral
pub struct RecoveryCascade {
    settle: Duration,
    peripherals: Vec<Box<dyn RecoverablePeripheral>>,
}

impl RecoveryCascade {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            peripherals: Vec::new(),
        }
    }

    pub fn with_peripheral(mut self, peripheral: Box<dyn RecoverablePeripheral>) -> Self {
        self.peripherals.push(peripheral);
        self
    }

    /// Fan controller, fan tray LEDs then front panel LEDs
    ///
    /// Each peripheral gets its own client on the hardware-access service.
    pub fn from_config(
        config: &RecoveryConfig,
        transport: &TransportConfig,
        versions: Box<dyn TelemetrySink>,
    ) -> Result<Self> {
        let fan_controller = RegisterPeripheral::new(
            &config.fan_controller,
            BatchedClient::from_config(transport)?,
        );
        let fan_tray =
            RegisterPeripheral::new(&config.fan_tray, BatchedClient::from_config(transport)?);
        let front_panel = FrontPanelLeds::new(
            &config.front_panel,
            BatchedClient::from_config(transport)?,
            config.front_panel_address_legacy,
            &config.device_version_key,
            versions,
        );
        Ok(Self::new(Duration::from_secs(config.settle_delay_secs))
            .with_peripheral(Box::new(fan_controller))
            .with_peripheral(Box::new(fan_tray))
            .with_peripheral(Box::new(front_panel)))
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Wait for the rails to settle, then re-init every peripheral
    ///
    /// A failing peripheral is logged and does not stop the others.
    pub async fn run(&mut self) {
        tokio::time::sleep(self.settle).await;
        for peripheral in self.peripherals.iter_mut() {
            info!("Re-initialising {}", peripheral.name());
            if let Err(e) = peripheral.reinit().await {
                error!("{:#}", e);
            }
        }
    }
}
