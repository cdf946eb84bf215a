// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error taxonomy for the power sequencer monitor
//!
//! Transport failures are best-effort poll errors, validation failures are
//! returned to the write-command caller, and a rail index outside the
//! declared map is a programming error that stops the daemon.

use thiserror::Error;

/// Errors raised by the monitoring core
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("hardware transport failed: {reason}")]
    Transport { reason: String },

    #[error("voltage rail {index} is outside the declared range 1..={max}")]
    RailOutOfRange { index: u8, max: u8 },

    #[error("transaction queue is full ({capacity} operations)")]
    QueueFull { capacity: usize },

    #[error("cannot set '{field}': field is not writable")]
    UnknownField { field: String },

    #[error("cannot set '{field}': '{value}' is not an integer")]
    Parse { field: String, value: String },

    #[error("cannot set '{field}': valid range is [{lo}, {hi}]")]
    OutOfRange { field: String, lo: i64, hi: i64 },

    #[error("cannot set '{field}': valid values are {options:?}")]
    InvalidValue { field: String, options: Vec<String> },

    #[error("hardware control line '{name}' not found")]
    HardwareAbsent { name: String },
}

impl MonitorError {
    /// Build a transport error from anything printable
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        MonitorError::Transport {
            reason: reason.to_string(),
        }
    }

    /// Programmer-level misuse that must stop the daemon
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::RailOutOfRange { .. } | MonitorError::QueueFull { .. }
        )
    }

    /// Malformed inbound write command
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MonitorError::UnknownField { .. }
                | MonitorError::Parse { .. }
                | MonitorError::OutOfRange { .. }
                | MonitorError::InvalidValue { .. }
        )
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
