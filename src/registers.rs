// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map of the UCD9090 power sequencer
//!
//! Each register is a stateless descriptor with a declared offset and a
//! width variant. Descriptors only know how to append a [`RegisterOp`] to a
//! [`TransactionQueue`] and how to read their value back out of the matching
//! [`OpResult`].
//!
//! ## Register Map
//!
//! | Offset | Name | Width |
//! |--------|------|-------|
//! | 0x00 | PAGE | 8-bit |
//! | 0x03 | CLEAR_FAULTS | 8-bit |
//! | 0x20 | VOUT_MODE | 8-bit |
//! | 0x79 | STATUS_WORD | 16-bit LE |
//! | 0x8B | READ_VOUT | 16-bit LE |
//! | 0xEA | LOGGED_FAULTS | block |
//! | 0xEB | LOGGED_FAULT_DETAIL_INDEX | 16-bit BE |
//! | 0xEC | LOGGED_FAULT_DETAIL | block |

use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;
use crate::transport::{OpResult, RegisterOp, TransactionQueue, TransferWidth};

/// Bus location of a device handled by the transport service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// I2C bus number
    pub bus: i32,
    /// 7-bit device address
    pub address: i32,
}

impl DeviceHandle {
    pub fn new(bus: i32, address: i32) -> Self {
        Self { bus, address }
    }
}

/// Width and byte order of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// 8-bit register
    Byte,
    /// 16-bit register, most significant byte first
    Word,
    /// 16-bit register, least significant byte first
    WordReversed,
    /// SMBus block register
    Block,
}

/// 8-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg8 {
    pub name: &'static str,
    pub offset: u8,
}

/// 16-bit big-endian register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg16 {
    pub name: &'static str,
    pub offset: u8,
}

/// 16-bit little-endian ("reversed") register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg16r {
    pub name: &'static str,
    pub offset: u8,
}

/// Block register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegBlock {
    pub name: &'static str,
    pub offset: u8,
}

impl Reg8 {
    pub fn get(&self, dev: &DeviceHandle, queue: &mut TransactionQueue) -> MonitorResult<usize> {
        queue.push(RegisterOp::read(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Byte,
        ))
    }

    /// Queue a byte write; the rest of the payload stays zero
    pub fn set(
        &self,
        dev: &DeviceHandle,
        queue: &mut TransactionQueue,
        value: u8,
    ) -> MonitorResult<usize> {
        queue.push(RegisterOp::write(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Byte,
            &[value],
        ))
    }

    pub fn decode(&self, result: &OpResult) -> MonitorResult<u8> {
        Ok(result.data()?[0])
    }
}

impl Reg16 {
    pub fn get(&self, dev: &DeviceHandle, queue: &mut TransactionQueue) -> MonitorResult<usize> {
        queue.push(RegisterOp::read(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Word,
        ))
    }

    pub fn set(
        &self,
        dev: &DeviceHandle,
        queue: &mut TransactionQueue,
        value: u16,
    ) -> MonitorResult<usize> {
        queue.push(RegisterOp::write(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Word,
            &value.to_be_bytes(),
        ))
    }

    pub fn decode(&self, result: &OpResult) -> MonitorResult<u16> {
        let data = result.data()?;
        Ok(u16::from_be_bytes([data[0], data[1]]))
    }
}

impl Reg16r {
    pub fn get(&self, dev: &DeviceHandle, queue: &mut TransactionQueue) -> MonitorResult<usize> {
        queue.push(RegisterOp::read(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Word,
        ))
    }

    pub fn set(
        &self,
        dev: &DeviceHandle,
        queue: &mut TransactionQueue,
        value: u16,
    ) -> MonitorResult<usize> {
        queue.push(RegisterOp::write(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Word,
            &value.to_le_bytes(),
        ))
    }

    pub fn decode(&self, result: &OpResult) -> MonitorResult<u16> {
        let data = result.data()?;
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }
}

impl RegBlock {
    /// Queue a block read of `len` bytes
    ///
    /// The result carries the block length in byte 0 followed by the data.
    pub fn get(
        &self,
        dev: &DeviceHandle,
        queue: &mut TransactionQueue,
        len: u8,
    ) -> MonitorResult<usize> {
        queue.push(RegisterOp::read(
            dev.bus,
            dev.address,
            self.offset,
            TransferWidth::Block(len),
        ))
    }
}

/// Declared register map of the power sequencer
#[derive(Debug, Clone, Copy)]
pub struct Ucd9090Registers {
    pub page: Reg8,
    pub clear_faults: Reg8,
    pub vout_mode: Reg8,
    pub status_word: Reg16r,
    pub read_vout: Reg16r,
    pub logged_faults: RegBlock,
    pub logged_fault_detail_index: Reg16,
    pub logged_fault_detail: RegBlock,
}

/// UCD9090 register map
pub const UCD9090: Ucd9090Registers = Ucd9090Registers {
    page: Reg8 {
        name: "PAGE",
        offset: 0x00,
    },
    clear_faults: Reg8 {
        name: "CLEAR_FAULTS",
        offset: 0x03,
    },
    vout_mode: Reg8 {
        name: "VOUT_MODE",
        offset: 0x20,
    },
    status_word: Reg16r {
        name: "STATUS_WORD",
        offset: 0x79,
    },
    read_vout: Reg16r {
        name: "READ_VOUT",
        offset: 0x8B,
    },
    logged_faults: RegBlock {
        name: "LOGGED_FAULTS",
        offset: 0xEA,
    },
    logged_fault_detail_index: Reg16 {
        name: "LOGGED_FAULT_DETAIL_INDEX",
        offset: 0xEB,
    },
    logged_fault_detail: RegBlock {
        name: "LOGGED_FAULT_DETAIL",
        offset: 0xEC,
    },
};

impl Ucd9090Registers {
    /// Ordered (name, offset, kind) listing of the map
    pub fn registry(&self) -> Vec<(&'static str, u8, RegisterKind)> {
        vec![
            (self.page.name, self.page.offset, RegisterKind::Byte),
            (
                self.clear_faults.name,
                self.clear_faults.offset,
                RegisterKind::Byte,
            ),
            (self.vout_mode.name, self.vout_mode.offset, RegisterKind::Byte),
            (
                self.status_word.name,
                self.status_word.offset,
                RegisterKind::WordReversed,
            ),
            (
                self.read_vout.name,
                self.read_vout.offset,
                RegisterKind::WordReversed,
            ),
            (
                self.logged_faults.name,
                self.logged_faults.offset,
                RegisterKind::Block,
            ),
            (
                self.logged_fault_detail_index.name,
                self.logged_fault_detail_index.offset,
                RegisterKind::Word,
            ),
            (
                self.logged_fault_detail.name,
                self.logged_fault_detail.offset,
                RegisterKind::Block,
            ),
        ]
    }

    /// Look up a register offset by name
    pub fn offset_of(&self, name: &str) -> Option<u8> {
        self.registry()
            .into_iter()
            .find(|(n, _, _)| *n == name)
            .map(|(_, offset, _)| offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Direction, BLOCK_MAX};

    const DEV: DeviceHandle = DeviceHandle {
        bus: 0,
        address: 0x7e,
    };

    #[test]
    fn test_registry_offsets_are_unique_and_ordered() {
        let registry = UCD9090.registry();
        let offsets: Vec<u8> = registry.iter().map(|(_, o, _)| *o).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(offsets, sorted);
        assert_eq!(UCD9090.offset_of("READ_VOUT"), Some(0x8B));
        assert_eq!(UCD9090.offset_of("NOPE"), None);
    }

    #[test]
    fn test_word_byte_order_follows_variant() {
        let mut queue = TransactionQueue::new();
        UCD9090
            .logged_fault_detail_index
            .set(&DEV, &mut queue, 0x0300)
            .unwrap();
        UCD9090.status_word.set(&DEV, &mut queue, 0x1234).unwrap();

        let ops = queue.ops();
        assert_eq!(&ops[0].payload[..2], &[0x03, 0x00]);
        assert_eq!(&ops[1].payload[..2], &[0x34, 0x12]);
        assert_eq!(ops[0].width, TransferWidth::Word);
        assert_eq!(ops[1].direction, Direction::Write);
    }

    #[test]
    fn test_byte_write_leaves_filler_zero() {
        let mut queue = TransactionQueue::new();
        let position = UCD9090.page.set(&DEV, &mut queue, 7).unwrap();
        assert_eq!(position, 0);
        let op = &queue.ops()[0];
        assert_eq!(op.payload[0], 7);
        assert!(op.payload[1..].iter().all(|b| *b == 0));
        assert_eq!(op.register_offset, 0x00);
        assert_eq!(op.address, 0x7e);
    }

    #[test]
    fn test_decode_by_variant() {
        let mut payload = [0u8; BLOCK_MAX];
        payload[0] = 0x12;
        payload[1] = 0x34;
        let result = OpResult::ok(payload);
        assert_eq!(UCD9090.logged_fault_detail_index.decode(&result).unwrap(), 0x1234);
        assert_eq!(UCD9090.read_vout.decode(&result).unwrap(), 0x3412);
        assert_eq!(UCD9090.vout_mode.decode(&result).unwrap(), 0x12);
    }

    #[test]
    fn test_block_read_width() {
        let mut queue = TransactionQueue::new();
        UCD9090
            .logged_fault_detail
            .get(&DEV, &mut queue, 11)
            .unwrap();
        assert_eq!(queue.ops()[0].width, TransferWidth::Block(11));
        assert_eq!(queue.ops()[0].register_offset, 0xEC);
    }
}
