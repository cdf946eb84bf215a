// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Power sequencer monitor library
//!
//! Polls the rail voltages and the fault log of a UCD9090 power sequencer
//! through a batched register transaction service, publishes them to a
//! telemetry store, and runs the host watchdog driving the host reset line.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gpio;
pub mod power_sequencer;
pub mod recovery;
pub mod registers;
pub mod telemetry;
pub mod transport;
pub mod watchdog;
