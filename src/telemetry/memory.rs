// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory telemetry sink
//!
//! Clones share one store, so a test can keep a handle while the daemon owns
//! the sink.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::TelemetrySink;

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, String>,
    history: Vec<(String, String)>,
    failing: bool,
}

/// Shared in-process key-value store
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a value without recording it as published
    pub fn insert(&self, key: &str, value: &str) {
        self.lock()
            .values
            .insert(key.to_string(), value.to_string());
    }

    /// Current value of a key
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    /// Every value published for a key, in order
    pub fn published(&self, key: &str) -> Vec<String> {
        self.lock()
            .history
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every published pair, in order
    pub fn history(&self) -> Vec<(String, String)> {
        self.lock().history.clone()
    }

    /// Make every publish fail
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

#[async_trait::async_trait]
impl TelemetrySink for MemorySink {
    async fn publish(&mut self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        if state.failing {
            return Err(anyhow!("simulated telemetry failure"));
        }
        state.values.insert(key.to_string(), value.to_string());
        state.history.push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.value(key))
    }

    fn sink_type(&self) -> &str {
        "memory"
    }
}
