// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use super::monitor::PowerSequencerMonitor;
use crate::commands::{CommandServer, WritableRegistry, WriteDispatcher};
use crate::config::Config;
use crate::telemetry::create_sink;

/// Represents the set of background tasks of the monitor daemon
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    dispatcher: Option<Arc<WriteDispatcher>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            dispatcher: None,
        }
    }

    /// Launch all configured tasks based on configuration
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let dispatcher = Arc::new(WriteDispatcher::new(
            WritableRegistry::with_watchdog_fields(config.watchdog.timeout_range),
            create_sink(&config.telemetry),
        ));
        self.dispatcher = Some(Arc::clone(&dispatcher));

        let monitor = PowerSequencerMonitor::from_config(config, Arc::clone(&dispatcher))?;
        self.launch_monitor(monitor);

        if config.command_server.enabled {
            self.start_command_server(config, dispatcher).await?;
        }

        Ok(())
    }

    /// Spawn the monitoring loop
    ///
    /// A fatal monitor error clears the running flag so that every other
    /// task winds down as well.
    pub fn launch_monitor(&mut self, monitor: PowerSequencerMonitor) {
        info!("Starting power sequencer monitor");
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let result = monitor.run(Arc::clone(&running)).await;
            if result.is_err() {
                running.store(false, Ordering::SeqCst);
            }
            result
        });
        self.tasks.push(task);
    }

    /// Start the write-command listener
    async fn start_command_server(
        &mut self,
        config: &Config,
        dispatcher: Arc<WriteDispatcher>,
    ) -> Result<()> {
        info!(
            "Starting command server on {}:{}",
            config.command_server.address, config.command_server.port
        );
        let server = CommandServer::bind(
            &config.command_server.address,
            config.command_server.port,
            dispatcher,
        )
        .await?;
        let running = self.running.clone();
        self.tasks.push(tokio::spawn(server.serve(running)));
        Ok(())
    }

    /// Write dispatcher shared by the command surfaces
    pub fn dispatcher(&self) -> Option<Arc<WriteDispatcher>> {
        self.dispatcher.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once the running flag has been cleared
    pub async fn stopped(&self) {
        while self.is_running() {
            time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    ///
    /// Returns the first error reported by a task.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for task in self.tasks {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Ok(()))) => debug!("Task completed"),
                Ok(Ok(Err(e))) => {
                    error!("Task failed: {:#}", e);
                    first_error.get_or_insert(e);
                }
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not stop within 5 seconds"),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
