// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Logged fault retrieval and deduplication
//!
//! The sequencer keeps a ring buffer of fault records, newest first. Every
//! poll reads the entry count, then selects and reads each record in turn.
//! The head record and the count form a fingerprint: when neither changed
//! since the previous poll the retrieval stops after the head and reports
//! nothing, so a hardware event is never reported twice.
//!
//! Record layout as returned by the block read (byte 0 is the block length):
//!
//! | Byte | Content |
//! |------|---------|
//! | 2..=5 | run-time clock, milliseconds, big-endian |
//! | 6 | bit 7 paged, bits 6..3 fault type, bits 2..0 page high bits |
//! | 7 | bit 7 page low bit |

use chrono::{DateTime, SecondsFormat};
use log::{debug, info, warn};

use crate::config::FaultLogMode;
use crate::error::MonitorResult;
use crate::recovery::RecoveryCascade;
use crate::registers::{DeviceHandle, UCD9090};
use crate::transport::{BatchedClient, Payload};

/// Length of a detail record block read
pub const DETAIL_RECORD_LEN: u8 = 11;

/// Number of head bytes compared by the fingerprint
pub const FINGERPRINT_LEN: usize = 12;

/// Rail names by page
const RAIL_NAMES: [&str; 10] = [
    "P5V_SB", "P3V8_BMC", "P3V3_SB", "PERI_3V3", "P3V3", "VDD_CORE", "P1V8", "P1V25", "P1V2",
    "P1V0",
];

/// Snapshot of the last seen fault log head
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupFingerprint {
    pub last_count: u8,
    pub last_bytes: [u8; FINGERPRINT_LEN],
}

impl DedupFingerprint {
    /// Fingerprint of a count and a head record
    pub fn of(count: u8, head: &Payload) -> Self {
        let mut last_bytes = [0u8; FINGERPRINT_LEN];
        last_bytes.copy_from_slice(&head[..FINGERPRINT_LEN]);
        Self {
            last_count: count,
            last_bytes,
        }
    }

    /// Record the current head; true when it differs from the stored one
    pub fn observe(&mut self, count: u8, head: &Payload) -> bool {
        let next = Self::of(count, head);
        if *self == next {
            return false;
        }
        *self = next;
        true
    }
}

/// One decoded fault record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultLogEntry {
    pub timestamp_ms: u32,
    pub fault_type: u8,
    pub paged: bool,
    pub page: u8,
}

impl FaultLogEntry {
    /// Decode a detail record from its block read result
    pub fn decode(data: &Payload) -> Self {
        Self {
            timestamp_ms: u32::from_be_bytes([data[2], data[3], data[4], data[5]]),
            fault_type: (data[6] >> 3) & 0xF,
            paged: data[6] & 0x80 != 0,
            page: ((data[7] & 0x80) >> 7) | ((data[6] & 0x7) << 1),
        }
    }

    /// Whole-second RFC3339 timestamp in UTC
    pub fn timestamp(&self) -> String {
        let seconds = i64::from(self.timestamp_ms / 1000);
        DateTime::from_timestamp(seconds, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }

    pub fn rail(&self) -> &'static str {
        if self.paged {
            rail_name(self.page)
        } else {
            "n/a"
        }
    }

    pub fn fault(&self) -> &'static str {
        classify(self.paged, self.fault_type)
    }

    /// Output over- or under-voltage, the events counted as power cycles
    pub fn is_power_loss(&self) -> bool {
        self.fault_type == 0 || self.fault_type == 1
    }

    /// `timestamp.rail.fault`
    pub fn describe(&self) -> String {
        format!("{}.{}.{}", self.timestamp(), self.rail(), self.fault())
    }
}

/// Rail name of a page, `n/a` past the last rail
pub fn rail_name(page: u8) -> &'static str {
    RAIL_NAMES.get(page as usize).copied().unwrap_or("n/a")
}

/// Fault name of a fault type code
pub fn classify(paged: bool, fault_type: u8) -> &'static str {
    if paged {
        match fault_type {
            0 => "VOUT_OV",
            1 => "VOUT_UV",
            2 => "TON_MAX",
            3 => "IOUT_OC",
            4 => "IOUT_UC",
            5 => "TEMPERATURE_OT",
            6 => "SEQUENCE ON TIMEOUT",
            7 => "SEQUENCE OFF TIMEOUT",
            _ => "unknown",
        }
    } else {
        match fault_type {
            1 => "SYSTEM WATCHDOG TIMEOUT",
            2 => "RESEQUENCE ERROR",
            3 => "WATCHDOG TIMEOUT",
            8 => "FAN FAULT",
            9 => "GPI FAULT",
            _ => "unknown",
        }
    }
}

/// Fault log retrieval state kept across polls
#[derive(Debug, Default)]
pub struct FaultLogEngine {
    fingerprint: DedupFingerprint,
    baseline_established: bool,
    /// Head the recovery cascade last ran for
    recovered: Option<DedupFingerprint>,
}

impl FaultLogEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fingerprint(&self) -> &DedupFingerprint {
        &self.fingerprint
    }

    /// Whether a full retrieval has completed since start
    pub fn baseline_established(&self) -> bool {
        self.baseline_established
    }

    /// Retrieve the fault log
    ///
    /// Returns an empty string when the head is unchanged. Otherwise returns
    /// the dot-separated power-loss timestamps (`PowerCycles`) or one
    /// `timestamp.rail.fault` line per entry (`Detail`). Once a baseline
    /// exists, a changed head runs `recovery` before the remaining entries
    /// are read, at most once per head even when the retrieval is retried.
    ///
    /// The fingerprint only moves to the new head after every entry was
    /// read; a transport failure part way leaves it on the previous head.
    pub async fn retrieve(
        &mut self,
        client: &mut BatchedClient,
        dev: &DeviceHandle,
        mode: FaultLogMode,
        mut recovery: Option<&mut RecoveryCascade>,
    ) -> MonitorResult<String> {
        let regs = UCD9090;

        let count_at = regs.logged_fault_detail_index.get(dev, client.queue_mut())?;
        let results = client.dispatch().await?;
        let count = (regs.logged_fault_detail_index.decode(&results[count_at])? & 0xFF) as u8;
        debug!("Fault log holds {} entries", count);

        let mut power_cycles: Vec<String> = Vec::new();
        let mut lines: Vec<String> = Vec::new();
        // Committed only once every entry was read, so a failed poll is retried
        let mut head: Option<DedupFingerprint> = None;

        for i in 0..count {
            regs.logged_fault_detail_index
                .set(dev, client.queue_mut(), u16::from(i) << 8)?;
            let record_at = regs
                .logged_fault_detail
                .get(dev, client.queue_mut(), DETAIL_RECORD_LEN)?;
            let results = client.dispatch().await?;
            let data = *results[record_at].data()?;

            if i == 0 {
                let candidate = DedupFingerprint::of(count, &data);
                if candidate == self.fingerprint {
                    debug!("Fault log head unchanged");
                    return Ok(String::new());
                }
                if self.baseline_established && self.recovered.as_ref() != Some(&candidate) {
                    if let Some(cascade) = recovery.as_deref_mut() {
                        warn!("Power event detected");
                        cascade.run().await;
                    }
                    self.recovered = Some(candidate.clone());
                }
                head = Some(candidate);
            }

            let entry = FaultLogEntry::decode(&data);
            match mode {
                FaultLogMode::PowerCycles => {
                    let timestamp = entry.timestamp();
                    if entry.is_power_loss() && !power_cycles.contains(&timestamp) {
                        power_cycles.push(timestamp);
                    }
                }
                FaultLogMode::Detail => lines.push(entry.describe()),
            }
        }

        if let Some(head) = head {
            self.fingerprint = head;
        }
        if !self.baseline_established {
            info!("Fault log baseline established ({} entries)", count);
        }
        self.baseline_established = true;

        Ok(match mode {
            FaultLogMode::PowerCycles => power_cycles.join("."),
            FaultLogMode::Detail => lines.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use crate::recovery::RegisterPeripheral;
    use crate::transport::{MockSequencer, MockTransport, BLOCK_MAX};
    use std::time::Duration;

    const DEV: DeviceHandle = DeviceHandle {
        bus: 0,
        address: 0x7e,
    };

    fn client(sequencer: &MockSequencer) -> BatchedClient {
        BatchedClient::new(
            Box::new(MockTransport::new(sequencer.clone())),
            Duration::ZERO,
        )
    }

    fn block(record: [u8; 11]) -> Payload {
        let mut payload = [0u8; BLOCK_MAX];
        payload[0] = 11;
        payload[1..12].copy_from_slice(&record);
        payload
    }

    #[test]
    fn test_decode_record_fields() {
        let data = block(MockSequencer::fault_record(1_000_500, true, 1, 9));
        let entry = FaultLogEntry::decode(&data);
        assert!(entry.paged);
        assert_eq!(entry.fault_type, 1);
        assert_eq!(entry.page, 9);
        assert_eq!(entry.rail(), "P1V0");
        assert_eq!(entry.fault(), "VOUT_UV");
    }

    #[test]
    fn test_timestamp_whole_seconds_utc() {
        let entry = FaultLogEntry {
            timestamp_ms: 86_400_999,
            fault_type: 0,
            paged: true,
            page: 0,
        };
        assert_eq!(entry.timestamp(), "1970-01-02T00:00:00Z");
        assert_eq!(entry.describe(), "1970-01-02T00:00:00Z.P5V_SB.VOUT_OV");
    }

    #[test]
    fn test_classification_is_total() {
        for paged in [false, true] {
            for code in 0u8..16 {
                assert!(!classify(paged, code).is_empty());
            }
        }
        assert_eq!(classify(true, 7), "SEQUENCE OFF TIMEOUT");
        assert_eq!(classify(true, 8), "unknown");
        assert_eq!(classify(false, 0), "unknown");
        assert_eq!(classify(false, 9), "GPI FAULT");
        assert_eq!(rail_name(10), "n/a");
        assert_eq!(rail_name(15), "n/a");
    }

    #[test]
    fn test_unpaged_rail_is_na() {
        let data = block(MockSequencer::fault_record(0, false, 8, 3));
        let entry = FaultLogEntry::decode(&data);
        assert_eq!(entry.rail(), "n/a");
        assert_eq!(entry.fault(), "FAN FAULT");
    }

    #[test]
    fn test_fingerprint_single_byte_difference() {
        let mut fingerprint = DedupFingerprint::default();
        let mut head = block(MockSequencer::fault_record(42_000, true, 0, 1));
        assert!(fingerprint.observe(1, &head));
        assert!(!fingerprint.observe(1, &head));
        head[11] ^= 0x01;
        assert!(fingerprint.observe(1, &head));
        assert!(fingerprint.observe(2, &head));
        // Bytes past the fingerprint are ignored
        head[20] = 0xAA;
        assert!(!fingerprint.observe(2, &head));
    }

    #[tokio::test]
    async fn test_second_identical_poll_is_empty() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![
            MockSequencer::fault_record(120_000, true, 1, 4),
            MockSequencer::fault_record(60_000, true, 0, 2),
        ]);
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();

        let first = engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .unwrap();
        assert_eq!(first, "1970-01-01T00:02:00Z.1970-01-01T00:01:00Z");
        assert!(engine.baseline_established());

        let batches_before = sequencer.batches().len();
        let second = engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .unwrap();
        assert!(second.is_empty());
        // Count read plus the head only
        assert_eq!(sequencer.batches().len(), batches_before + 2);
    }

    #[tokio::test]
    async fn test_new_head_is_reported() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![MockSequencer::fault_record(1_000, true, 0, 0)]);
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, None)
            .await
            .unwrap();

        sequencer.log_fault(MockSequencer::fault_record(5_000, false, 3, 0));
        let detail = engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, None)
            .await
            .unwrap();
        assert_eq!(
            detail,
            "1970-01-01T00:00:05Z.n/a.WATCHDOG TIMEOUT\n1970-01-01T00:00:01Z.P5V_SB.VOUT_OV"
        );
        assert_eq!(engine.fingerprint().last_count, 2);
    }

    #[tokio::test]
    async fn test_power_cycles_filters_and_dedups() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![
            MockSequencer::fault_record(9_000, true, 1, 3),
            MockSequencer::fault_record(9_400, true, 0, 5),
            MockSequencer::fault_record(7_000, true, 5, 1),
            MockSequencer::fault_record(3_000, false, 1, 0),
        ]);
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        let cycles = engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .unwrap();
        assert_eq!(cycles, "1970-01-01T00:00:09Z.1970-01-01T00:00:03Z");
    }

    #[tokio::test]
    async fn test_empty_log() {
        let sequencer = MockSequencer::new();
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        let out = engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, None)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert!(engine.baseline_established());
    }

    #[tokio::test]
    async fn test_failed_retrieval_is_reported_next_poll() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![MockSequencer::fault_record(1_000, true, 0, 0)]);
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .unwrap();

        // Count and head succeed, the second entry fails
        sequencer.log_fault(MockSequencer::fault_record(4_000, true, 1, 2));
        sequencer.fail_batches_after(2, 1);
        assert!(engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .is_err());
        assert_eq!(engine.fingerprint().last_count, 1);
        client.clear();

        let cycles = engine
            .retrieve(&mut client, &DEV, FaultLogMode::PowerCycles, None)
            .await
            .unwrap();
        assert_eq!(cycles, "1970-01-01T00:00:04Z.1970-01-01T00:00:01Z");
        assert_eq!(engine.fingerprint().last_count, 2);
    }

    #[tokio::test]
    async fn test_recovery_runs_once_per_head_across_retries() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![MockSequencer::fault_record(1_000, true, 0, 0)]);
        let config = RecoveryConfig::default();
        let mut cascade = RecoveryCascade::new(Duration::ZERO).with_peripheral(Box::new(
            RegisterPeripheral::new(&config.fan_controller, client(&sequencer)),
        ));
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, Some(&mut cascade))
            .await
            .unwrap();

        // Count, head and the recovery batch succeed, the second entry fails
        sequencer.log_fault(MockSequencer::fault_record(4_000, true, 1, 2));
        sequencer.fail_batches_after(3, 1);
        assert!(engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, Some(&mut cascade))
            .await
            .is_err());
        client.clear();
        let init_writes = config.fan_controller.init.len();
        assert_eq!(sequencer.writes_to(11, 0x2f).len(), init_writes);

        let detail = engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, Some(&mut cascade))
            .await
            .unwrap();
        assert_eq!(detail.lines().count(), 2);
        assert_eq!(sequencer.writes_to(11, 0x2f).len(), init_writes);

        // A later event runs the cascade again
        sequencer.log_fault(MockSequencer::fault_record(9_000, true, 0, 1));
        engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, Some(&mut cascade))
            .await
            .unwrap();
        assert_eq!(sequencer.writes_to(11, 0x2f).len(), 2 * init_writes);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let sequencer = MockSequencer::new();
        sequencer.set_faults(vec![MockSequencer::fault_record(1_000, true, 0, 0)]);
        sequencer.fail_next_batches(1);
        let mut client = client(&sequencer);
        let mut engine = FaultLogEngine::new();
        let err = engine
            .retrieve(&mut client, &DEV, FaultLogMode::Detail, None)
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(!engine.baseline_established());
    }
}
