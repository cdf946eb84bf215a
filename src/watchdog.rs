// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Host Watchdog
//!
//! The supervised host proves it is alive by writing a new heartbeat
//! sequence value at least once per timeout. The watchdog advances by one
//! second on every fast tick; when the elapsed time reaches the timeout, the
//! host reset line is pulsed low and the watchdog disables itself.
//!
//! ```text
//!            enable()                      tick, elapsed >= timeout
//! Disabled ───────────► Enabled ─────────────────────────────► Expired
//!    ▲  ◄─────────────────  │                                     │
//!    │      disable()       │ heartbeat(): elapsed = 0            │
//!    └──────────────────────┴───── reset pulse, elapsed = 0 ◄─────┘
//! ```
//!
//! `expired` stays set until the next `enable()`.

use log::{info, warn};
use std::time::Duration;

use crate::config::WatchdogConfig;
use crate::error::MonitorError;
use crate::gpio::GpioController;

/// Telemetry keys of the watchdog state
pub const KEY_ENABLE: &str = "watchdog.enable";
pub const KEY_TIMEOUT: &str = "watchdog.timeout.units.seconds";
pub const KEY_TIMER: &str = "watchdog.timer.units.seconds";
pub const KEY_SEQUENCE: &str = "watchdog.sequence";
pub const KEY_EXPIRED: &str = "watchdog.expired";

/// Phase of the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogPhase {
    Disabled,
    Enabled,
    /// Only observed as the outcome of the tick that fired the reset
    Expired,
}

/// Observable watchdog state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogState {
    pub enabled: bool,
    pub timeout_seconds: u32,
    pub elapsed_seconds: u32,
    pub sequence: String,
    pub expired: bool,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: 30,
            elapsed_seconds: 0,
            sequence: "0".to_string(),
            expired: false,
        }
    }
}

impl WatchdogState {
    /// Formatted (key, value) pairs in publication order
    pub fn telemetry(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_ENABLE, self.enabled.to_string()),
            (KEY_TIMEOUT, self.timeout_seconds.to_string()),
            (KEY_TIMER, self.elapsed_seconds.to_string()),
            (KEY_SEQUENCE, self.sequence.clone()),
            (KEY_EXPIRED, self.expired.to_string()),
        ]
    }
}

/// Watchdog state machine driving the host reset line
pub struct Watchdog {
    state: WatchdogState,
    reset_pin: String,
    reset_pulse: Duration,
    gpio: Box<dyn GpioController>,
}

impl Watchdog {
    pub fn new(
        timeout_seconds: u32,
        reset_pin: &str,
        reset_pulse: Duration,
        gpio: Box<dyn GpioController>,
    ) -> Self {
        Self {
            state: WatchdogState {
                timeout_seconds,
                ..Default::default()
            },
            reset_pin: reset_pin.to_string(),
            reset_pulse,
            gpio,
        }
    }

    pub fn from_config(config: &WatchdogConfig, gpio: Box<dyn GpioController>) -> Self {
        Self::new(
            config.timeout_seconds,
            &config.reset_pin,
            Duration::from_millis(config.reset_pulse_ms),
            gpio,
        )
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }

    pub fn phase(&self) -> WatchdogPhase {
        if self.state.enabled {
            WatchdogPhase::Enabled
        } else {
            WatchdogPhase::Disabled
        }
    }

    /// Arm the watchdog; the elapsed time is kept
    pub fn enable(&mut self) {
        if !self.state.enabled {
            info!("Host watchdog enabled ({} s)", self.state.timeout_seconds);
        }
        self.state.enabled = true;
        self.state.expired = false;
    }

    pub fn disable(&mut self) {
        if self.state.enabled {
            info!("Host watchdog disabled");
        }
        self.state.enabled = false;
        self.state.elapsed_seconds = 0;
    }

    /// Reset the elapsed time and store the sequence value when enabled
    ///
    /// Returns false when the value was rejected because the watchdog is
    /// disabled; the stored sequence value is then unchanged.
    pub fn heartbeat(&mut self, sequence: &str) -> bool {
        self.state.elapsed_seconds = 0;
        if self.state.enabled {
            self.state.sequence = sequence.to_string();
            true
        } else {
            false
        }
    }

    /// New timeout, checked from the next tick on
    pub fn set_timeout(&mut self, seconds: u32) {
        self.state.timeout_seconds = seconds;
    }

    /// Advance by one second
    ///
    /// Returns [`WatchdogPhase::Expired`] on the tick that reset the host,
    /// otherwise the current phase.
    pub async fn tick(&mut self) -> WatchdogPhase {
        if !self.state.enabled {
            return WatchdogPhase::Disabled;
        }
        if self.state.elapsed_seconds < self.state.timeout_seconds {
            self.state.elapsed_seconds += 1;
        }
        if self.state.elapsed_seconds < self.state.timeout_seconds {
            return WatchdogPhase::Enabled;
        }

        warn!("Host watchdog timer expired; resetting host and disabling watchdog");
        self.state.expired = true;
        self.pulse_reset().await;
        self.state.enabled = false;
        self.state.elapsed_seconds = 0;
        WatchdogPhase::Expired
    }

    /// Drive the reset line low for the pulse length, then release it
    async fn pulse_reset(&mut self) {
        let Some(mut pin) = self.gpio.find_pin(&self.reset_pin) else {
            warn!(
                "{}",
                MonitorError::HardwareAbsent {
                    name: self.reset_pin.clone()
                }
            );
            return;
        };
        if let Err(e) = pin.set_value(false).await {
            warn!("Failed to assert {}: {}", pin.name(), e);
        }
        tokio::time::sleep(self.reset_pulse).await;
        if let Err(e) = pin.set_value(true).await {
            warn!("Failed to release {}: {}", pin.name(), e);
        }
    }
}
