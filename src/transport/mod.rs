// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Batched register transport
//!
//! Register reads and writes are not issued one by one. They are accumulated
//! in a bounded [`TransactionQueue`] and sent in a single round trip to the
//! hardware-access service that owns the physical bus. The service answers
//! with one [`OpResult`] per queued [`RegisterOp`], in the same order.
//!
//! Drivers:
//! - HTTP: JSON batches posted to the local hardware-access service
//! - Mock: an in-process simulation of the power sequencer register file

pub mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockSequencer, MockTransport};

use anyhow::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{TransportConfig, TransportType};
use crate::error::{MonitorError, MonitorResult};

/// Maximum number of operations in one batch
pub const MAX_OPS: usize = 30;

/// Size of the per-operation payload buffer (SMBus block: count + 32 data + PEC)
pub const BLOCK_MAX: usize = 34;

/// Bus number of the sentinel operation asking whether the bus is paused
pub const STOPPED_PROBE_BUS: i32 = 0x98;

/// Fixed payload buffer carried by every operation and result
pub type Payload = [u8; BLOCK_MAX];

/// Transfer direction of a register operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
}

/// Width of a register transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferWidth {
    /// SMBus byte data
    Byte,
    /// SMBus word data
    Word,
    /// SMBus block data of the given length
    Block(u8),
}

/// One queued register transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOp {
    /// Inactive entries are filler and ignored by the service
    pub active: bool,
    pub direction: Direction,
    pub register_offset: u8,
    pub width: TransferWidth,
    #[serde(with = "payload_serde")]
    pub payload: Payload,
    pub bus: i32,
    pub address: i32,
    /// Delay the service applies after this op, in milliseconds
    pub delay: i32,
}

impl Default for RegisterOp {
    fn default() -> Self {
        Self {
            active: false,
            direction: Direction::Read,
            register_offset: 0,
            width: TransferWidth::Byte,
            payload: [0; BLOCK_MAX],
            bus: 0,
            address: 0,
            delay: 0,
        }
    }
}

impl RegisterOp {
    /// Build an active read operation with an empty payload
    pub fn read(bus: i32, address: i32, register_offset: u8, width: TransferWidth) -> Self {
        Self {
            active: true,
            direction: Direction::Read,
            register_offset,
            width,
            bus,
            address,
            ..Default::default()
        }
    }

    /// Build an active write operation carrying `data` in the leading payload bytes
    pub fn write(
        bus: i32,
        address: i32,
        register_offset: u8,
        width: TransferWidth,
        data: &[u8],
    ) -> Self {
        let mut payload = [0; BLOCK_MAX];
        let len = data.len().min(BLOCK_MAX);
        payload[..len].copy_from_slice(&data[..len]);
        Self {
            active: true,
            direction: Direction::Write,
            register_offset,
            width,
            payload,
            bus,
            address,
            ..Default::default()
        }
    }
}

/// Result of one register operation, positionally matched to its request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpResult {
    #[serde(with = "payload_serde")]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for OpResult {
    fn default() -> Self {
        Self {
            payload: [0; BLOCK_MAX],
            error: None,
        }
    }
}

impl OpResult {
    /// Build a successful result
    pub fn ok(payload: Payload) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    /// Payload of the result, or a transport error if the service flagged this op
    pub fn data(&self) -> MonitorResult<&Payload> {
        match &self.error {
            Some(reason) => Err(MonitorError::transport(reason)),
            None => Ok(&self.payload),
        }
    }
}

/// Serialize the fixed payload as a plain byte sequence
mod payload_serde {
    use super::{Payload, BLOCK_MAX};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(payload: &Payload, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(payload.iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Payload, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        if bytes.len() > BLOCK_MAX {
            return Err(D::Error::custom(format!(
                "payload of {} bytes exceeds {} bytes",
                bytes.len(),
                BLOCK_MAX
            )));
        }
        let mut payload = [0; BLOCK_MAX];
        payload[..bytes.len()].copy_from_slice(&bytes);
        Ok(payload)
    }
}

/// Bounded, ordered sequence of register operations
///
/// A queue position doubles as the correlation key of the matching result.
#[derive(Debug, Clone)]
pub struct TransactionQueue {
    slots: Vec<RegisterOp>,
    len: usize,
}

impl Default for TransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionQueue {
    /// Create an empty queue of `MAX_OPS` inactive slots
    pub fn new() -> Self {
        Self {
            slots: vec![RegisterOp::default(); MAX_OPS],
            len: 0,
        }
    }

    /// Append an operation and return its position
    pub fn push(&mut self, op: RegisterOp) -> MonitorResult<usize> {
        if self.len >= MAX_OPS {
            return Err(MonitorError::QueueFull { capacity: MAX_OPS });
        }
        let position = self.len;
        self.slots[position] = op;
        self.len += 1;
        Ok(position)
    }

    /// Reset every slot to an inactive entry
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = RegisterOp::default();
        }
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queued operations, in order
    pub fn ops(&self) -> &[RegisterOp] {
        &self.slots[..self.len]
    }

    /// Full fixed-size batch as sent on the wire, inactive filler included
    pub fn slots(&self) -> &[RegisterOp] {
        &self.slots
    }
}

/// Hardware transport trait for the batched register service
#[async_trait::async_trait]
pub trait HardwareTransport: Send + Sync {
    /// Establish the connection to the hardware-access service
    async fn connect(&mut self) -> Result<()>;

    /// Execute one batch and return one result per slot, in order
    async fn batch_transact(&mut self, ops: &[RegisterOp]) -> Result<Vec<OpResult>>;
}

/// Create the hardware transport selected by configuration
pub fn create_transport(config: &TransportConfig) -> Result<Box<dyn HardwareTransport>> {
    match config.transport_type {
        TransportType::Http => Ok(Box::new(HttpTransport::new(&config.url)?)),
        TransportType::Mock => Ok(Box::new(MockTransport::new(MockSequencer::new()))),
    }
}

/// Queue plus lazily-connected transport
///
/// `dispatch` sends the whole queue in one round trip. On failure the queue
/// is left populated; the caller decides whether to clear it and retry.
pub struct BatchedClient {
    transport: Box<dyn HardwareTransport>,
    queue: TransactionQueue,
    connected: bool,
    settle_delay: Duration,
}

impl BatchedClient {
    /// Create a client around a transport
    ///
    /// # Arguments
    /// * `transport` - Driver used for every batch
    /// * `settle_delay` - Pause after the connection is first established
    pub fn new(transport: Box<dyn HardwareTransport>, settle_delay: Duration) -> Self {
        Self {
            transport,
            queue: TransactionQueue::new(),
            connected: false,
            settle_delay,
        }
    }

    /// Create a client from the transport configuration
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        Ok(Self::new(
            create_transport(config)?,
            Duration::from_millis(config.settle_delay_ms),
        ))
    }

    /// Append a read operation, returning its queue position
    pub fn enqueue_read(
        &mut self,
        bus: i32,
        address: i32,
        register_offset: u8,
        width: TransferWidth,
    ) -> MonitorResult<usize> {
        self.queue
            .push(RegisterOp::read(bus, address, register_offset, width))
    }

    /// Append a write operation, returning its queue position
    pub fn enqueue_write(
        &mut self,
        bus: i32,
        address: i32,
        register_offset: u8,
        width: TransferWidth,
        data: &[u8],
    ) -> MonitorResult<usize> {
        self.queue
            .push(RegisterOp::write(bus, address, register_offset, width, data))
    }

    /// Direct access to the queue for register descriptors
    pub fn queue_mut(&mut self) -> &mut TransactionQueue {
        &mut self.queue
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    /// Discard every queued operation
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Send the queue in one round trip and return the results of the queued ops
    pub async fn dispatch(&mut self) -> MonitorResult<Vec<OpResult>> {
        if !self.connected {
            if let Err(e) = self.transport.connect().await {
                error!("Hardware transport connection failed: {}", e);
                return Err(MonitorError::transport(e));
            }
            self.connected = true;
            info!("Connected to hardware-access service");
            if !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }
        }

        let count = self.queue.len();
        debug!("Dispatching batch of {} register operations", count);

        let results = match self.transport.batch_transact(self.queue.slots()).await {
            Ok(results) => results,
            Err(e) => {
                error!("Register batch failed: {}", e);
                return Err(MonitorError::transport(e));
            }
        };

        if results.len() < count {
            return Err(MonitorError::transport(format!(
                "service returned {} results for {} operations",
                results.len(),
                count
            )));
        }

        self.queue.clear();
        Ok(results.into_iter().take(count).collect())
    }

    /// Ask the hardware-access service whether the shared bus is paused
    ///
    /// A failed probe counts as stopped, so the caller skips its poll.
    pub async fn bus_stopped(&mut self) -> bool {
        self.clear();
        if self
            .enqueue_write(STOPPED_PROBE_BUS, 0, 0, TransferWidth::Byte, &[0])
            .is_err()
        {
            return true;
        }
        match self.dispatch().await {
            Ok(results) => results.first().map(|r| r.payload[0] != 0).unwrap_or(true),
            Err(_) => {
                self.clear();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bound() {
        let mut queue = TransactionQueue::new();
        for i in 0..MAX_OPS {
            assert_eq!(
                queue
                    .push(RegisterOp::read(0, 0x7e, i as u8, TransferWidth::Byte))
                    .unwrap(),
                i
            );
        }
        assert!(matches!(
            queue.push(RegisterOp::default()),
            Err(MonitorError::QueueFull { capacity: MAX_OPS })
        ));

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.slots().iter().all(|op| !op.active));
        assert_eq!(queue.slots().len(), MAX_OPS);
    }

    #[test]
    fn test_write_zero_fills_payload() {
        let op = RegisterOp::write(1, 0x20, 0x03, TransferWidth::Byte, &[0xAB]);
        assert_eq!(op.payload[0], 0xAB);
        assert!(op.payload[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_payload_json_shape() {
        let op = RegisterOp::write(0, 0x7e, 0x00, TransferWidth::Word, &[0x12, 0x34]);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["payload"].as_array().unwrap().len(), BLOCK_MAX);
        assert_eq!(json["width"], "word");

        let short: OpResult = serde_json::from_str(r#"{"payload":[1,2,3]}"#).unwrap();
        assert_eq!(&short.payload[..4], &[1, 2, 3, 0]);
        assert!(short.error.is_none());

        let too_long = format!(r#"{{"payload":{:?}}}"#, vec![0u8; BLOCK_MAX + 1]);
        assert!(serde_json::from_str::<OpResult>(&too_long).is_err());
    }

    #[test]
    fn test_result_error_is_transport() {
        let failed = OpResult {
            payload: [0; BLOCK_MAX],
            error: Some("nack".to_string()),
        };
        assert!(matches!(failed.data(), Err(MonitorError::Transport { .. })));
    }
}
