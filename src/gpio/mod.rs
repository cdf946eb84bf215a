// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Control line access
//!
//! Named output lines (such as the host reset line) are looked up through a
//! [`GpioController`] and driven through the returned [`GpioPin`].
//!
//! Drivers:
//! - Sysfs: `/sys/class/gpio` value files, numbered through configuration
//! - Mock: records every level change for tests

pub mod mock;
pub mod sysfs;

pub use mock::MockGpio;
pub use sysfs::SysfsGpio;

use anyhow::Result;

use crate::config::GpioConfig;

/// Output control line
#[async_trait::async_trait]
pub trait GpioPin: Send + Sync {
    /// Line name as used for lookup
    fn name(&self) -> &str;

    /// Drive the line high (`true`) or low (`false`)
    async fn set_value(&mut self, high: bool) -> Result<()>;
}

/// Lookup of control lines by name
pub trait GpioController: Send + Sync {
    /// Find a line; `None` when the board does not provide it
    fn find_pin(&self, name: &str) -> Option<Box<dyn GpioPin>>;
}

/// Create the sysfs controller described by configuration
pub fn create_gpio_controller(config: &GpioConfig) -> Box<dyn GpioController> {
    Box::new(SysfsGpio::new(&config.sysfs_root, config.pins.clone()))
}
