// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mock GPIO controller recording line activity

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::{GpioController, GpioPin};

/// Controller exposing a fixed set of lines and recording every level change
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    lines: BTreeSet<String>,
    history: Arc<Mutex<Vec<(String, bool)>>>,
}

impl MockGpio {
    /// Create a controller providing the named lines
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every (line, level) written so far, in order
    pub fn history(&self) -> Vec<(String, bool)> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

impl GpioController for MockGpio {
    fn find_pin(&self, name: &str) -> Option<Box<dyn GpioPin>> {
        if !self.lines.contains(name) {
            return None;
        }
        Some(Box::new(MockPin {
            name: name.to_string(),
            history: Arc::clone(&self.history),
        }))
    }
}

struct MockPin {
    name: String,
    history: Arc<Mutex<Vec<(String, bool)>>>,
}

#[async_trait::async_trait]
impl GpioPin for MockPin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_value(&mut self, high: bool) -> Result<()> {
        if let Ok(mut history) = self.history.lock() {
            history.push((self.name.clone(), high));
        }
        Ok(())
    }
}
