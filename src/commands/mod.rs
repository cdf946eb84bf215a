// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Write Commands
//!
//! Management tools change daemon state by writing a string value to a named
//! field. The field must be registered in the [`WritableRegistry`]; its
//! optional constraint is checked before anything is mutated.
//!
//! An accepted write is echoed to telemetry at once and parked in the
//! pending queue of the [`WriteDispatcher`]. The daemon loop drains the queue
//! on every fast tick and hands each write to [`apply_write`], which
//! dispatches on the field's [`ApplyFn`] tag.
//!
//! The inbound path runs on its own task; the pending queue is the only state
//! it shares with the daemon loop, guarded by a mutex.

pub mod server;

pub use server::CommandServer;

use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{MonitorError, MonitorResult};
use crate::telemetry::TelemetrySink;
use crate::watchdog::{self, Watchdog};

/// Device tag of the fields owned by this daemon
pub const DEVICE_TAG: &str = "ucd9090";

/// Accepted values of a writable field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Inclusive integer range
    Range { lo: i64, hi: i64 },
    /// Exact string options
    OneOf(Vec<String>),
}

/// Handler run when a pending write is drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyFn {
    WatchdogEnable,
    WatchdogTimeout,
    WatchdogSequence,
    /// Echo only
    None,
}

/// Registration of a writable field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableField {
    /// Daemon owning the field
    pub device: String,
    pub apply: ApplyFn,
    pub constraint: Option<Constraint>,
}

/// Field name to registration, fixed once the daemon starts
#[derive(Debug, Clone, Default)]
pub struct WritableRegistry {
    fields: BTreeMap<String, WritableField>,
}

impl WritableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of the watchdog fields
    ///
    /// # Arguments
    /// * `timeout_range` - Accepted `[lo, hi]` of the timeout field
    pub fn with_watchdog_fields(timeout_range: [i64; 2]) -> Self {
        let bools = vec!["true".to_string(), "false".to_string()];
        Self::new()
            .register(
                watchdog::KEY_ENABLE,
                ApplyFn::WatchdogEnable,
                Some(Constraint::OneOf(bools)),
            )
            .register(
                watchdog::KEY_TIMEOUT,
                ApplyFn::WatchdogTimeout,
                Some(Constraint::Range {
                    lo: timeout_range[0],
                    hi: timeout_range[1],
                }),
            )
            .register(watchdog::KEY_SEQUENCE, ApplyFn::WatchdogSequence, None)
    }

    /// Add a field owned by this daemon
    pub fn register(
        mut self,
        name: &str,
        apply: ApplyFn,
        constraint: Option<Constraint>,
    ) -> Self {
        self.fields.insert(
            name.to_string(),
            WritableField {
                device: DEVICE_TAG.to_string(),
                apply,
                constraint,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&WritableField> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Check a write against the field registration
    pub fn validate(&self, name: &str, value: &str) -> MonitorResult<&WritableField> {
        let field = self
            .fields
            .get(name)
            .ok_or_else(|| MonitorError::UnknownField {
                field: name.to_string(),
            })?;

        match &field.constraint {
            None => {}
            Some(Constraint::Range { lo, hi }) => {
                let parsed: i64 = value.parse().map_err(|_| MonitorError::Parse {
                    field: name.to_string(),
                    value: value.to_string(),
                })?;
                if parsed < *lo || parsed > *hi {
                    return Err(MonitorError::OutOfRange {
                        field: name.to_string(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
            }
            Some(Constraint::OneOf(options)) => {
                if !options.iter().any(|o| o == value) {
                    return Err(MonitorError::InvalidValue {
                        field: name.to_string(),
                        options: options.clone(),
                    });
                }
            }
        }
        Ok(field)
    }
}

/// Accepted write waiting for the next fast tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub field: String,
    pub value: String,
    pub apply: ApplyFn,
}

/// Validates inbound writes and queues them for the daemon loop
pub struct WriteDispatcher {
    registry: WritableRegistry,
    pending: Mutex<Vec<PendingWrite>>,
    echo: tokio::sync::Mutex<Box<dyn TelemetrySink>>,
}

impl WriteDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    /// * `registry` - Writable fields
    /// * `echo` - Sink receiving accepted values, also used to answer reads
    pub fn new(registry: WritableRegistry, echo: Box<dyn TelemetrySink>) -> Self {
        Self {
            registry,
            pending: Mutex::new(Vec::new()),
            echo: tokio::sync::Mutex::new(echo),
        }
    }

    pub fn registry(&self) -> &WritableRegistry {
        &self.registry
    }

    /// Validate and accept a write
    ///
    /// A later write to the same field replaces one that was not drained yet
    /// and takes its place at the back of the queue.
    pub async fn set(&self, field: &str, value: &str) -> MonitorResult<()> {
        let apply = match self.registry.validate(field, value) {
            Ok(registration) => registration.apply,
            Err(e) => {
                debug!("Rejected write {}={}: {}", field, value, e);
                return Err(e);
            }
        };

        {
            let mut sink = self.echo.lock().await;
            if let Err(e) = sink.publish(field, value).await {
                error!("Failed to echo {}: {}", field, e);
            }
        }

        let write = PendingWrite {
            field: field.to_string(),
            value: value.to_string(),
            apply,
        };
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|p| p.field != write.field);
        pending.push(write);
        Ok(())
    }

    /// Current telemetry value of a field
    pub async fn get(&self, field: &str) -> Option<String> {
        let mut sink = self.echo.lock().await;
        match sink.get(field).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {}: {}", field, e);
                None
            }
        }
    }

    /// Take every pending write, ordered by the last acceptance of its field
    pub fn drain(&self) -> Vec<PendingWrite> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Result of applying a drained write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The value did not parse for its handler and was dropped
    Ignored,
    /// Heartbeat while disabled; the stored sequence must be republished
    HeartbeatRejected,
}

/// Boolean spellings accepted for the enable field
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Apply a drained write to the watchdog
pub fn apply_write(write: &PendingWrite, watchdog: &mut Watchdog) -> ApplyOutcome {
    match write.apply {
        ApplyFn::WatchdogEnable => match parse_bool(&write.value) {
            Some(true) => {
                watchdog.enable();
                ApplyOutcome::Applied
            }
            Some(false) => {
                watchdog.disable();
                ApplyOutcome::Applied
            }
            None => {
                warn!("Ignoring {}={}: not a boolean", write.field, write.value);
                ApplyOutcome::Ignored
            }
        },
        ApplyFn::WatchdogTimeout => match write.value.trim().parse::<u32>() {
            Ok(seconds) => {
                watchdog.set_timeout(seconds);
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!("Ignoring {}={}: {}", write.field, write.value, e);
                ApplyOutcome::Ignored
            }
        },
        ApplyFn::WatchdogSequence => {
            if watchdog.heartbeat(&write.value) {
                ApplyOutcome::Applied
            } else {
                ApplyOutcome::HeartbeatRejected
            }
        }
        ApplyFn::None => ApplyOutcome::Applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::MockGpio;
    use crate::telemetry::MemorySink;
    use std::time::Duration;

    fn dispatcher(sink: &MemorySink) -> WriteDispatcher {
        let registry = WritableRegistry::with_watchdog_fields([1, 3600])
            .register(
                "test.percent",
                ApplyFn::None,
                Some(Constraint::Range { lo: 0, hi: 100 }),
            )
            .register(
                "test.flag",
                ApplyFn::None,
                Some(Constraint::OneOf(vec!["true".into(), "false".into()])),
            );
        WriteDispatcher::new(registry, Box::new(sink.clone()))
    }

    #[test]
    fn test_range_constraint() {
        let registry = WritableRegistry::new().register(
            "f",
            ApplyFn::None,
            Some(Constraint::Range { lo: 0, hi: 100 }),
        );
        assert!(matches!(
            registry.validate("f", "150"),
            Err(MonitorError::OutOfRange { lo: 0, hi: 100, .. })
        ));
        assert!(matches!(
            registry.validate("f", "abc"),
            Err(MonitorError::Parse { .. })
        ));
        assert!(registry.validate("f", "50").is_ok());
        assert!(registry.validate("f", "0").is_ok());
        assert!(registry.validate("f", "100").is_ok());
    }

    #[test]
    fn test_enum_constraint() {
        let registry = WritableRegistry::with_watchdog_fields([1, 3600]);
        let err = registry.validate(watchdog::KEY_ENABLE, "maybe").unwrap_err();
        assert!(matches!(err, MonitorError::InvalidValue { .. }));
        assert!(err.is_validation());
        assert!(registry.validate(watchdog::KEY_ENABLE, "true").is_ok());
    }

    #[test]
    fn test_unknown_and_unconstrained_fields() {
        let registry = WritableRegistry::with_watchdog_fields([1, 3600]);
        assert!(matches!(
            registry.validate("fan.speed", "3"),
            Err(MonitorError::UnknownField { .. })
        ));
        assert!(registry.validate(watchdog::KEY_SEQUENCE, "anything at all").is_ok());
        assert_eq!(registry.get(watchdog::KEY_SEQUENCE).unwrap().device, DEVICE_TAG);
    }

    #[tokio::test]
    async fn test_rejected_write_mutates_nothing() {
        let sink = MemorySink::new();
        let dispatcher = dispatcher(&sink);
        assert!(dispatcher.set("test.percent", "150").await.is_err());
        assert!(dispatcher.set("test.flag", "maybe").await.is_err());
        assert_eq!(dispatcher.pending_len(), 0);
        assert!(sink.history().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_write_is_echoed_and_queued() {
        let sink = MemorySink::new();
        let dispatcher = dispatcher(&sink);
        dispatcher.set("test.percent", "50").await.unwrap();
        dispatcher.set(watchdog::KEY_SEQUENCE, "1").await.unwrap();
        dispatcher.set("test.percent", "60").await.unwrap();

        assert_eq!(sink.published("test.percent"), vec!["50", "60"]);
        assert_eq!(dispatcher.get("test.percent").await.as_deref(), Some("60"));

        let drained = dispatcher.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].apply, ApplyFn::WatchdogSequence);
        assert_eq!(drained[1].value, "60");
        assert!(dispatcher.drain().is_empty());
    }

    #[tokio::test]
    async fn test_replaced_write_applies_after_later_fields() {
        let sink = MemorySink::new();
        let dispatcher = dispatcher(&sink);
        dispatcher.set(watchdog::KEY_SEQUENCE, "1").await.unwrap();
        dispatcher.set(watchdog::KEY_ENABLE, "true").await.unwrap();
        dispatcher.set(watchdog::KEY_SEQUENCE, "2").await.unwrap();

        let drained = dispatcher.drain();
        let fields: Vec<&str> = drained.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec![watchdog::KEY_ENABLE, watchdog::KEY_SEQUENCE]);

        // Enabling first lets the heartbeat through
        let mut wd = Watchdog::new(
            30,
            "BMC_TO_HOST_RST_L",
            Duration::ZERO,
            Box::new(MockGpio::default()),
        );
        let outcomes: Vec<ApplyOutcome> =
            drained.iter().map(|w| apply_write(w, &mut wd)).collect();
        assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::Applied]);
        assert_eq!(wd.state().sequence, "2");
        assert_eq!(sink.value(watchdog::KEY_SEQUENCE).as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_poisoned_queue_still_reports_pending() {
        let sink = MemorySink::new();
        let dispatcher = dispatcher(&sink);
        dispatcher.set("test.percent", "10").await.unwrap();

        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = dispatcher.pending.lock().unwrap();
            panic!("writer panicked while holding the queue");
        }));
        assert!(poisoned.is_err());
        assert!(dispatcher.pending.is_poisoned());

        dispatcher.set("test.flag", "true").await.unwrap();
        assert_eq!(dispatcher.pending_len(), 2);
        assert_eq!(dispatcher.drain().len(), 2);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_apply_watchdog_writes() {
        let mut wd = Watchdog::new(
            30,
            "BMC_TO_HOST_RST_L",
            Duration::ZERO,
            Box::new(MockGpio::default()),
        );
        let write = |field: &str, value: &str, apply| PendingWrite {
            field: field.to_string(),
            value: value.to_string(),
            apply,
        };

        let beat = write(watchdog::KEY_SEQUENCE, "9", ApplyFn::WatchdogSequence);
        assert_eq!(apply_write(&beat, &mut wd), ApplyOutcome::HeartbeatRejected);

        let enable = write(watchdog::KEY_ENABLE, "true", ApplyFn::WatchdogEnable);
        assert_eq!(apply_write(&enable, &mut wd), ApplyOutcome::Applied);
        assert!(wd.state().enabled);
        assert_eq!(apply_write(&beat, &mut wd), ApplyOutcome::Applied);
        assert_eq!(wd.state().sequence, "9");

        let timeout = write(watchdog::KEY_TIMEOUT, "12", ApplyFn::WatchdogTimeout);
        assert_eq!(apply_write(&timeout, &mut wd), ApplyOutcome::Applied);
        assert_eq!(wd.state().timeout_seconds, 12);

        let bad = write(watchdog::KEY_ENABLE, "maybe", ApplyFn::WatchdogEnable);
        assert_eq!(apply_write(&bad, &mut wd), ApplyOutcome::Ignored);
        assert!(wd.state().enabled);
    }
}
