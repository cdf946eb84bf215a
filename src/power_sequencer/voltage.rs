// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rail voltage decoding
//!
//! The sequencer reports each rail as a 16-bit unsigned mantissa (READ_VOUT)
//! and a mode byte (VOUT_MODE) whose low nibble packs the exponent. The
//! voltage is `mantissa * 2^exponent`, rounded to three decimals.

use log::debug;

use crate::error::{MonitorError, MonitorResult};
use crate::registers::{DeviceHandle, UCD9090};
use crate::transport::BatchedClient;

/// Number of monitored rails; rail indices are 1-based
pub const RAIL_COUNT: u8 = 10;

/// Recover the exponent from the low nibble of a VOUT_MODE byte
///
/// The nibble is decremented modulo 256, complemented on four bits and
/// negated, so `0x1` gives -15, `0xF` gives -1 and `0x0` wraps to 0.
pub fn exponent_from_mode(mode: u8) -> i32 {
    let raw = (mode & 0xF).wrapping_sub(1);
    let raw = (raw ^ 0xF) & 0xF;
    -i32::from(raw)
}

/// Round to three decimals through the decimal representation
fn round3(value: f64) -> f64 {
    format!("{:.3}", value).parse().unwrap_or(value)
}

/// Decode a mantissa and exponent into volts, rounded to three decimals
pub fn decode_voltage(mantissa: u16, exponent: i32) -> f64 {
    round3(f64::from(mantissa) * 2f64.powi(exponent))
}

/// Read the voltage of a 1-based rail in one 3-op batch
///
/// # Errors
///
/// [`MonitorError::RailOutOfRange`] when `rail` is outside `1..=RAIL_COUNT`,
/// [`MonitorError::Transport`] when the batch fails. On a transport failure
/// the queue is left populated.
pub async fn read_voltage(
    client: &mut BatchedClient,
    dev: &DeviceHandle,
    rail: u8,
) -> MonitorResult<f64> {
    if rail < 1 || rail > RAIL_COUNT {
        return Err(MonitorError::RailOutOfRange {
            index: rail,
            max: RAIL_COUNT,
        });
    }

    let regs = UCD9090;
    let queue = client.queue_mut();
    regs.page.set(dev, queue, rail - 1)?;
    let mode_at = regs.vout_mode.get(dev, queue)?;
    let vout_at = regs.read_vout.get(dev, queue)?;

    let results = client.dispatch().await?;
    let mode = regs.vout_mode.decode(&results[mode_at])?;
    let mantissa = regs.read_vout.decode(&results[vout_at])?;

    let volts = decode_voltage(mantissa, exponent_from_mode(mode));
    debug!(
        "Rail {}: mode 0x{:02x}, mantissa {} -> {} V",
        rail, mode, mantissa, volts
    );
    Ok(volts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockSequencer, MockTransport};
    use std::time::Duration;

    #[test]
    fn test_exponent_for_every_nibble() {
        let expected = [
            0, -15, -14, -13, -12, -11, -10, -9, -8, -7, -6, -5, -4, -3, -2, -1,
        ];
        for m in 0u8..16 {
            assert_eq!(exponent_from_mode(m), expected[m as usize], "nibble {}", m);
            let formula = -((((m as i32) - 1) ^ 0xF) & 0xF);
            assert_eq!(exponent_from_mode(m), formula, "nibble {}", m);
        }
    }

    #[test]
    fn test_exponent_ignores_high_nibble() {
        assert_eq!(exponent_from_mode(0x13), exponent_from_mode(0x03));
        assert_eq!(exponent_from_mode(0xF0), 0);
    }

    #[test]
    fn test_decode_voltage_rounding() {
        // 0x1A00 * 2^-12 = 1.625
        assert_eq!(decode_voltage(0x1A00, -12), 1.625);
        // 13107 * 2^-12 = 3.199951...
        assert_eq!(decode_voltage(13107, -12), 3.2);
        // 1 * 2^-15 rounds to zero
        assert_eq!(decode_voltage(1, -15), 0.0);
        assert_eq!(decode_voltage(5, 0), 5.0);
        for (v, e) in [(0xFFFFu16, -1), (12345, -13), (777, -3)] {
            let raw = f64::from(v) * 2f64.powi(e);
            assert!((decode_voltage(v, e) - raw).abs() <= 0.0005);
        }
    }

    #[tokio::test]
    async fn test_read_voltage_selects_page() {
        let sequencer = MockSequencer::new();
        // VOUT_MODE 0x14: nibble 4 -> exponent -12
        sequencer.set_rail(3, 0x14, 13517);
        let mut client = BatchedClient::new(
            Box::new(MockTransport::new(sequencer.clone())),
            Duration::ZERO,
        );
        let dev = DeviceHandle::new(0, 0x7e);

        let volts = read_voltage(&mut client, &dev, 3).await.unwrap();
        assert_eq!(volts, 3.3);

        let batches = sequencer.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0][0].payload[0], 2);
        assert!(client.queue().is_empty());
    }

    #[tokio::test]
    async fn test_rail_out_of_range_is_fatal() {
        let mut client = BatchedClient::new(
            Box::new(MockTransport::new(MockSequencer::new())),
            Duration::ZERO,
        );
        let dev = DeviceHandle::new(0, 0x7e);
        for rail in [0u8, 11] {
            let err = read_voltage(&mut client, &dev, rail).await.unwrap_err();
            assert!(err.is_fatal());
        }
        assert!(client.queue().is_empty());
    }
}
