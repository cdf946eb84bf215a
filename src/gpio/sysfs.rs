// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sysfs GPIO driver

use anyhow::{Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{GpioController, GpioPin};

/// Controller mapping line names to sysfs GPIO numbers
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    pins: BTreeMap<String, u32>,
}

impl SysfsGpio {
    /// Create a controller
    ///
    /// # Arguments
    /// * `root` - Sysfs GPIO class directory (e.g., "/sys/class/gpio")
    /// * `pins` - Line name to GPIO number
    pub fn new(root: &str, pins: BTreeMap<String, u32>) -> Self {
        Self {
            root: PathBuf::from(root),
            pins,
        }
    }
}

impl GpioController for SysfsGpio {
    fn find_pin(&self, name: &str) -> Option<Box<dyn GpioPin>> {
        let number = *self.pins.get(name)?;
        Some(Box::new(SysfsPin {
            name: name.to_string(),
            number,
            root: self.root.clone(),
            configured: false,
        }))
    }
}

/// One exported sysfs line
#[derive(Debug)]
struct SysfsPin {
    name: String,
    number: u32,
    root: PathBuf,
    configured: bool,
}

impl SysfsPin {
    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.number))
    }

    /// Export the line if needed and make it an output
    async fn configure(&mut self) -> Result<()> {
        if !self.line_dir().exists() {
            tokio::fs::write(self.root.join("export"), self.number.to_string())
                .await
                .with_context(|| format!("Failed to export GPIO {}", self.number))?;
        }
        tokio::fs::write(self.line_dir().join("direction"), "out")
            .await
            .with_context(|| format!("Failed to set GPIO {} as output", self.number))?;
        self.configured = true;
        Ok(())
    }
}

#[async_trait::async_trait]
impl GpioPin for SysfsPin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_value(&mut self, high: bool) -> Result<()> {
        if !self.configured {
            self.configure().await?;
        }
        debug!("GPIO {} ({}) <- {}", self.name, self.number, high as u8);
        tokio::fs::write(
            self.line_dir().join("value"),
            if high { "1" } else { "0" },
        )
        .await
        .with_context(|| format!("Failed to drive GPIO {}", self.name))
    }
}
