// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mock hardware transport simulating the power sequencer
//!
//! This module provides an in-process stand-in for the hardware-access
//! service. It emulates the UCD9090 register file (page selection, Vout
//! telemetry and the logged fault ring buffer), answers the bus-stopped
//! probe, and keeps a plain register store for every other device so that
//! peripheral re-initialisation writes can be inspected.
//!
//! The simulated state lives behind an `Arc<Mutex<>>`: a [`MockSequencer`]
//! handle can be cloned into several transports and kept by tests to mutate
//! the hardware while the daemon owns the transport.

use anyhow::{anyhow, Result};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Direction, HardwareTransport, OpResult, RegisterOp, TransferWidth, BLOCK_MAX,
    STOPPED_PROBE_BUS,
};
use crate::registers::UCD9090;

/// Number of data bytes in one logged fault detail record
pub const FAULT_DETAIL_LEN: usize = 11;

/// Number of pages (rails) of the simulated sequencer
const PAGE_COUNT: usize = 10;

/// Simulated register state
#[derive(Debug)]
struct MockSequencerState {
    /// Bus location of the sequencer
    bus: i32,
    address: i32,
    /// Currently selected page
    page: u8,
    /// VOUT_MODE byte per page
    vout_mode: [u8; PAGE_COUNT],
    /// READ_VOUT mantissa per page
    vout: [u16; PAGE_COUNT],
    /// LOGGED_FAULT_DETAIL_INDEX selector
    fault_index: u8,
    /// Fault ring buffer, newest entry first
    faults: Vec<[u8; FAULT_DETAIL_LEN]>,
    /// Answer of the bus-stopped probe
    stopped: bool,
    /// Whether `connect` succeeds
    reachable: bool,
    /// Number of upcoming batches that fail
    failing_batches: usize,
    /// Batches that still succeed before `failing_batches` applies
    passing_batches: usize,
    /// Active ops of every executed batch
    batches: Vec<Vec<RegisterOp>>,
    /// Plain register store for every other device
    registers: HashMap<(i32, i32, u8), Vec<u8>>,
}

/// Shared handle on the simulated power sequencer
#[derive(Debug, Clone)]
pub struct MockSequencer {
    state: Arc<Mutex<MockSequencerState>>,
}

impl Default for MockSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSequencer {
    /// Create a sequencer at bus 0, address 0x7e with every rail at 0 V
    pub fn new() -> Self {
        Self::at(0, 0x7e)
    }

    /// Create a sequencer at the given bus location
    pub fn at(bus: i32, address: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockSequencerState {
                bus,
                address,
                page: 0,
                vout_mode: [0; PAGE_COUNT],
                vout: [0; PAGE_COUNT],
                fault_index: 0,
                faults: Vec::new(),
                stopped: false,
                reachable: true,
                failing_batches: 0,
                passing_batches: 0,
                batches: Vec::new(),
                registers: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockSequencerState> {
        // A panicking test thread must not hide the simulated state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the raw telemetry of a 1-based rail
    pub fn set_rail(&self, rail: u8, vout_mode: u8, mantissa: u16) {
        let mut state = self.lock();
        let page = rail.saturating_sub(1) as usize;
        if page < PAGE_COUNT {
            state.vout_mode[page] = vout_mode;
            state.vout[page] = mantissa;
        }
    }

    /// Log a new fault record as the newest entry
    pub fn log_fault(&self, record: [u8; FAULT_DETAIL_LEN]) {
        self.lock().faults.insert(0, record);
    }

    /// Overwrite the fault ring buffer, newest entry first
    pub fn set_faults(&self, records: Vec<[u8; FAULT_DETAIL_LEN]>) {
        self.lock().faults = records;
    }

    /// Pause or resume the shared bus
    pub fn set_stopped(&self, stopped: bool) {
        self.lock().stopped = stopped;
    }

    /// Make the service reachable or not
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Fail the next `count` batches
    pub fn fail_next_batches(&self, count: usize) {
        self.fail_batches_after(0, count);
    }

    /// Let `pass` batches through, then fail the following `count`
    pub fn fail_batches_after(&self, pass: usize, count: usize) {
        let mut state = self.lock();
        state.passing_batches = pass;
        state.failing_batches = count;
    }

    /// Active ops of every batch executed so far
    pub fn batches(&self) -> Vec<Vec<RegisterOp>> {
        self.lock().batches.clone()
    }

    /// Every write executed against a device
    pub fn writes_to(&self, bus: i32, address: i32) -> Vec<RegisterOp> {
        self.lock()
            .batches
            .iter()
            .flatten()
            .filter(|op| {
                op.direction == Direction::Write && op.bus == bus && op.address == address
            })
            .cloned()
            .collect()
    }

    /// Current content of a plain register
    pub fn register(&self, bus: i32, address: i32, offset: u8) -> Option<Vec<u8>> {
        self.lock().registers.get(&(bus, address, offset)).cloned()
    }

    /// Build a fault detail record
    ///
    /// # Arguments
    /// * `timestamp_ms` - Run-time clock of the fault in milliseconds
    /// * `paged` - Whether the fault is attached to a rail
    /// * `fault_type` - 4-bit fault code
    /// * `page` - Rail page (only meaningful when `paged`)
    pub fn fault_record(
        timestamp_ms: u32,
        paged: bool,
        fault_type: u8,
        page: u8,
    ) -> [u8; FAULT_DETAIL_LEN] {
        let mut record = [0u8; FAULT_DETAIL_LEN];
        record[1..5].copy_from_slice(&timestamp_ms.to_be_bytes());
        record[5] = ((paged as u8) << 7) | ((fault_type & 0xF) << 3) | ((page >> 1) & 0x7);
        record[6] = (page & 0x1) << 7;
        record
    }

    fn execute(&self, ops: &[RegisterOp]) -> Result<Vec<OpResult>> {
        let mut state = self.lock();
        if state.passing_batches > 0 {
            state.passing_batches -= 1;
        } else if state.failing_batches > 0 {
            state.failing_batches -= 1;
            return Err(anyhow!("simulated transport failure"));
        }

        let results: Vec<OpResult> = ops.iter().map(|op| state.execute_op(op)).collect();
        let active: Vec<RegisterOp> = ops.iter().filter(|op| op.active).cloned().collect();
        state.batches.push(active);
        Ok(results)
    }
}

impl MockSequencerState {
    fn execute_op(&mut self, op: &RegisterOp) -> OpResult {
        if !op.active {
            return OpResult::default();
        }
        let mut payload = [0u8; BLOCK_MAX];

        if op.bus == STOPPED_PROBE_BUS {
            payload[0] = self.stopped as u8;
            return OpResult::ok(payload);
        }

        if op.bus == self.bus && op.address == self.address {
            if self.execute_sequencer_op(op, &mut payload) {
                return OpResult::ok(payload);
            }
        }

        let key = (op.bus, op.address, op.register_offset);
        let len = match op.width {
            TransferWidth::Byte => 1,
            TransferWidth::Word => 2,
            TransferWidth::Block(n) => (n as usize).min(BLOCK_MAX),
        };
        match op.direction {
            Direction::Write => {
                self.registers.insert(key, op.payload[..len].to_vec());
            }
            Direction::Read => {
                if let Some(stored) = self.registers.get(&key) {
                    payload[..stored.len()].copy_from_slice(stored);
                }
            }
        }
        OpResult::ok(payload)
    }

    /// Emulate the sequencer registers; false when the op is not one of them
    fn execute_sequencer_op(&mut self, op: &RegisterOp, payload: &mut [u8; BLOCK_MAX]) -> bool {
        let regs = UCD9090;
        let page = self.page as usize;
        match (op.direction, op.register_offset) {
            (Direction::Write, o) if o == regs.page.offset => {
                self.page = op.payload[0];
            }
            (Direction::Read, o) if o == regs.page.offset => {
                payload[0] = self.page;
            }
            (Direction::Read, o) if o == regs.vout_mode.offset => {
                payload[0] = self.vout_mode.get(page).copied().unwrap_or(0);
            }
            (Direction::Read, o) if o == regs.read_vout.offset => {
                let mantissa = self.vout.get(page).copied().unwrap_or(0);
                payload[..2].copy_from_slice(&mantissa.to_le_bytes());
            }
            (Direction::Read, o) if o == regs.logged_fault_detail_index.offset => {
                payload[0] = self.fault_index;
                payload[1] = self.faults.len().min(u8::MAX as usize) as u8;
            }
            (Direction::Write, o) if o == regs.logged_fault_detail_index.offset => {
                self.fault_index = op.payload[0];
            }
            (Direction::Read, o) if o == regs.logged_fault_detail.offset => {
                let len = match op.width {
                    TransferWidth::Block(n) => (n as usize).min(BLOCK_MAX - 1),
                    _ => FAULT_DETAIL_LEN,
                };
                payload[0] = len as u8;
                if let Some(record) = self.faults.get(self.fault_index as usize) {
                    let n = len.min(FAULT_DETAIL_LEN);
                    payload[1..1 + n].copy_from_slice(&record[..n]);
                }
            }
            (Direction::Write, o) if o == regs.clear_faults.offset => {
                self.faults.clear();
                self.fault_index = 0;
            }
            _ => return false,
        }
        debug!(
            "Mock sequencer {:?} at 0x{:02X} (page {})",
            op.direction, op.register_offset, self.page
        );
        true
    }
}

/// Hardware transport backed by a [`MockSequencer`]
#[derive(Debug, Clone)]
pub struct MockTransport {
    sequencer: MockSequencer,
}

impl MockTransport {
    pub fn new(sequencer: MockSequencer) -> Self {
        Self { sequencer }
    }

    pub fn sequencer(&self) -> &MockSequencer {
        &self.sequencer
    }
}

#[async_trait::async_trait]
impl HardwareTransport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.sequencer.lock().reachable {
            Ok(())
        } else {
            Err(anyhow!("connection refused by simulated hardware service"))
        }
    }

    async fn batch_transact(&mut self, ops: &[RegisterOp]) -> Result<Vec<OpResult>> {
        if !self.sequencer.lock().reachable {
            return Err(anyhow!("simulated hardware service unreachable"));
        }
        self.sequencer.execute(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::DeviceHandle;
    use crate::transport::{BatchedClient, TransactionQueue, MAX_OPS};
    use std::time::Duration;

    fn client(sequencer: &MockSequencer) -> BatchedClient {
        BatchedClient::new(
            Box::new(MockTransport::new(sequencer.clone())),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_full_batch_results_match_positions() {
        let sequencer = MockSequencer::new();
        let mut client = client(&sequencer);
        let dev = DeviceHandle::new(3, 0x20);

        for i in 0..MAX_OPS {
            client
                .enqueue_write(dev.bus, dev.address, i as u8, TransferWidth::Byte, &[i as u8])
                .unwrap();
        }
        client.dispatch().await.unwrap();

        for i in 0..MAX_OPS {
            client
                .enqueue_read(dev.bus, dev.address, i as u8, TransferWidth::Byte)
                .unwrap();
        }
        let results = client.dispatch().await.unwrap();
        assert_eq!(results.len(), MAX_OPS);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.payload[0], i as u8);
        }
        assert!(client.queue().is_empty());
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_queue() {
        let sequencer = MockSequencer::new();
        let mut client = client(&sequencer);
        sequencer.fail_next_batches(1);

        client.enqueue_read(0, 0x7e, 0x20, TransferWidth::Byte).unwrap();
        assert!(client.dispatch().await.is_err());
        assert_eq!(client.queue().len(), 1);

        let results = client.dispatch().await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let sequencer = MockSequencer::new();
        sequencer.set_reachable(false);
        let mut client = client(&sequencer);
        client.enqueue_read(0, 0x7e, 0x20, TransferWidth::Byte).unwrap();

        assert!(client.dispatch().await.is_err());
        assert!(!client.is_connected());
        assert_eq!(client.queue().len(), 1);

        sequencer.set_reachable(true);
        assert!(client.dispatch().await.is_ok());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_bus_stopped_probe() {
        let sequencer = MockSequencer::new();
        let mut client = client(&sequencer);
        assert!(!client.bus_stopped().await);

        sequencer.set_stopped(true);
        assert!(client.bus_stopped().await);

        sequencer.set_stopped(false);
        sequencer.fail_next_batches(1);
        assert!(client.bus_stopped().await);
        assert!(client.queue().is_empty());
    }

    #[test]
    fn test_fault_record_layout() {
        let record = MockSequencer::fault_record(0x01020304, true, 0x5, 0x7);
        assert_eq!(&record[1..5], &[1, 2, 3, 4]);
        assert_eq!(record[5], 0x80 | (0x5 << 3) | 0x3);
        assert_eq!(record[6], 0x80);
    }

    #[test]
    fn test_inactive_slots_produce_empty_results() {
        let sequencer = MockSequencer::new();
        let queue = TransactionQueue::new();
        let results = sequencer.execute(queue.slots()).unwrap();
        assert_eq!(results.len(), MAX_OPS);
        assert!(results.iter().all(|r| r.payload.iter().all(|b| *b == 0)));
        assert_eq!(sequencer.batches().len(), 1);
        assert!(sequencer.batches()[0].is_empty());
    }
}
