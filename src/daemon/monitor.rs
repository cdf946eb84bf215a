// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Two-cadence monitoring loop
//!
//! The slow period polls rail voltages and the fault log; the fast period
//! drains pending writes and advances the host watchdog. Both run on one
//! task, so the transaction queue, the fault log fingerprint and the
//! watchdog state are never touched concurrently.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::commands::{apply_write, ApplyOutcome, WriteDispatcher};
use crate::config::Config;
use crate::error::MonitorResult;
use crate::gpio::create_gpio_controller;
use crate::power_sequencer::PowerSequencer;
use crate::recovery::RecoveryCascade;
use crate::telemetry::{create_sink, Publisher};
use crate::transport::BatchedClient;
use crate::watchdog::{self, Watchdog, WatchdogPhase};

/// State owned by the monitoring loop
pub struct PowerSequencerMonitor {
    client: BatchedClient,
    sequencer: PowerSequencer,
    watchdog: Watchdog,
    publisher: Publisher,
    dispatcher: Arc<WriteDispatcher>,
    recovery: Option<RecoveryCascade>,
    poll_interval: Duration,
    watchdog_interval: Duration,
}

impl PowerSequencerMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: BatchedClient,
        sequencer: PowerSequencer,
        watchdog: Watchdog,
        publisher: Publisher,
        dispatcher: Arc<WriteDispatcher>,
        recovery: Option<RecoveryCascade>,
        poll_interval: Duration,
        watchdog_interval: Duration,
    ) -> Self {
        Self {
            client,
            sequencer,
            watchdog,
            publisher,
            dispatcher,
            recovery,
            poll_interval,
            watchdog_interval,
        }
    }

    /// Build the monitor and its collaborators from configuration
    pub fn from_config(config: &Config, dispatcher: Arc<WriteDispatcher>) -> Result<Self> {
        let recovery = if config.recovery.enabled {
            Some(RecoveryCascade::from_config(
                &config.recovery,
                &config.transport,
                create_sink(&config.telemetry),
            )?)
        } else {
            None
        };

        Ok(Self::new(
            BatchedClient::from_config(&config.transport)?,
            PowerSequencer::from_config(config),
            Watchdog::from_config(&config.watchdog, create_gpio_controller(&config.gpio)),
            Publisher::new(create_sink(&config.telemetry)),
            dispatcher,
            recovery,
            Duration::from_secs(config.scheduler.poll_interval_secs),
            Duration::from_secs(config.scheduler.watchdog_interval_secs),
        ))
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn sequencer(&self) -> &PowerSequencer {
        &self.sequencer
    }

    /// Slow period: rail voltages then the fault log
    ///
    /// A transport failure abandons the rest of the poll and leaves the
    /// queue empty for the next one.
    pub async fn poll(&mut self) -> MonitorResult<()> {
        if !self.sequencer.is_present() {
            return Ok(());
        }
        if self.client.bus_stopped().await {
            debug!("Bus paused, skipping poll");
            return Ok(());
        }

        let result = self.poll_sequencer().await;
        if result.is_err() {
            self.client.clear();
        }
        result
    }

    async fn poll_sequencer(&mut self) -> MonitorResult<()> {
        let readings = self.sequencer.read_rails(&mut self.client).await?;
        for (key, volts) in readings {
            self.publisher.publish(&key, &volts.to_string()).await;
        }

        let events = self
            .sequencer
            .read_fault_log(&mut self.client, self.recovery.as_mut())
            .await?;
        if !events.is_empty() {
            let key = self.sequencer.fault_log_key().to_string();
            self.publisher.publish(&key, &events).await;
        }
        Ok(())
    }

    /// Fast period: apply pending writes, advance the watchdog, publish it
    pub async fn tick(&mut self) -> WatchdogPhase {
        for write in self.dispatcher.drain() {
            debug!("Applying {}={}", write.field, write.value);
            if apply_write(&write, &mut self.watchdog) == ApplyOutcome::HeartbeatRejected {
                // Overwrite the echoed value with the one still in force
                let sequence = self.watchdog.state().sequence.clone();
                self.publisher
                    .force_publish(watchdog::KEY_SEQUENCE, &sequence)
                    .await;
            }
        }

        let phase = self.watchdog.tick().await;

        for (key, value) in self.watchdog.state().telemetry() {
            self.publisher.publish(key, &value).await;
        }
        phase
    }

    /// Run both periods until `running` is cleared or a fatal error occurs
    ///
    /// The first poll and the first tick fire one period after start.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        info!(
            "Power sequencer monitor started (poll {:?}, watchdog {:?})",
            self.poll_interval, self.watchdog_interval
        );

        let mut poll = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fast = time::interval_at(
            Instant::now() + self.watchdog_interval,
            self.watchdog_interval,
        );
        fast.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll().await {
                        if e.is_fatal() {
                            error!("Power sequencer monitor stopping: {}", e);
                            return Err(e.into());
                        }
                        warn!("Power sequencer poll failed: {}", e);
                    }
                }
                _ = fast.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Power sequencer monitor stopped");
        Ok(())
    }
}
