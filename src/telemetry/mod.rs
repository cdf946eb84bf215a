// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Telemetry
//!
//! Observable state leaves the daemon as `(key, value)` string pairs handed
//! to a [`TelemetrySink`]. The [`Publisher`] in front of the sink suppresses
//! a pair whose formatted value equals the last one published for that key.
//!
//! Sinks:
//! - Redis: hash field plus a `key: value` notification on a channel
//! - Log: pairs are only logged
//! - Memory: shared in-process store for tests

pub mod memory;
pub mod redis;

pub use memory::MemorySink;
pub use redis::RedisSink;

use anyhow::Result;
use log::{error, info};
use std::collections::HashMap;

use crate::config::{TelemetryConfig, TelemetryType};

/// Key-value telemetry service
#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Store and announce one pair
    async fn publish(&mut self, key: &str, value: &str) -> Result<()>;

    /// Read back the current value of a key
    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Sink type for log messages
    fn sink_type(&self) -> &str;
}

/// Create the telemetry sink selected by configuration
pub fn create_sink(config: &TelemetryConfig) -> Box<dyn TelemetrySink> {
    match config.telemetry_type {
        TelemetryType::Redis => Box::new(RedisSink::new(
            &config.redis_url,
            &config.hash,
            &config.channel,
        )),
        TelemetryType::Log => Box::new(LogSink),
    }
}

/// Sink writing every pair to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl TelemetrySink for LogSink {
    async fn publish(&mut self, key: &str, value: &str) -> Result<()> {
        info!("{}: {}", key, value);
        Ok(())
    }

    async fn get(&mut self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn sink_type(&self) -> &str {
        "log"
    }
}

/// Diff-suppressing front of a sink
pub struct Publisher {
    sink: Box<dyn TelemetrySink>,
    last: HashMap<String, String>,
}

impl Publisher {
    pub fn new(sink: Box<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            last: HashMap::new(),
        }
    }

    /// Publish when `value` differs from the last value published for `key`
    ///
    /// Returns true when the pair reached the sink. A sink failure is logged
    /// and leaves the last value untouched, so the pair is retried on the
    /// next call.
    pub async fn publish(&mut self, key: &str, value: &str) -> bool {
        if self.last.get(key).map(String::as_str) == Some(value) {
            return false;
        }
        self.force_publish(key, value).await
    }

    /// Publish regardless of the last published value
    pub async fn force_publish(&mut self, key: &str, value: &str) -> bool {
        match self.sink.publish(key, value).await {
            Ok(()) => {
                self.last.insert(key.to_string(), value.to_string());
                true
            }
            Err(e) => {
                error!(
                    "Failed to publish {} to {} sink: {}",
                    key,
                    self.sink.sink_type(),
                    e
                );
                false
            }
        }
    }

    /// Last value published for a key
    pub fn last(&self, key: &str) -> Option<&str> {
        self.last.get(key).map(String::as_str)
    }
}
