// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Redis telemetry sink
//!
//! Every pair is stored as a field of one hash and announced on a pub/sub
//! channel as `key: value`, the format read by the BMC management tools.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use redis::AsyncCommands;
use redis::{aio::MultiplexedConnection, Client};

use super::TelemetrySink;

/// Redis hash plus channel sink
#[derive(Debug)]
pub struct RedisSink {
    /// Redis connection URL
    url: String,
    /// Hash holding the current values
    hash: String,
    /// Channel announcing changes
    channel: String,
    client: Option<Client>,
    connection: Option<MultiplexedConnection>,
}

impl RedisSink {
    /// Create a new Redis sink; the connection is opened on first use
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `hash` - Hash receiving the values
    /// * `channel` - Channel receiving `key: value` notifications
    pub fn new(
        url: impl Into<String>,
        hash: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            hash: hash.into(),
            channel: channel.into(),
            client: None,
            connection: None,
        }
    }

    async fn get_connection(&mut self) -> Result<&mut MultiplexedConnection> {
        if self.connection.is_none() {
            let client = match self.client.take() {
                Some(client) => client,
                None => Client::open(self.url.clone())?,
            };
            match client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!("Connected to Redis at {}", self.url);
                    self.connection = Some(conn);
                }
                Err(e) => {
                    error!("Redis connection error: {}", e);
                    self.client = Some(client);
                    return Err(anyhow::anyhow!("Redis connection error: {}", e));
                }
            }
            self.client = Some(client);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Redis connection unavailable"))
    }
}

#[async_trait]
impl TelemetrySink for RedisSink {
    async fn publish(&mut self, key: &str, value: &str) -> Result<()> {
        let hash = self.hash.clone();
        let channel = self.channel.clone();
        let message = format!("{}: {}", key, value);

        let conn = self.get_connection().await?;
        let stored: redis::RedisResult<()> = conn.hset(&hash, key, value).await;
        if let Err(e) = stored {
            self.connection = None;
            return Err(e.into());
        }
        let announced: redis::RedisResult<()> = conn.publish(&channel, &message).await;
        if let Err(e) = announced {
            self.connection = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let hash = self.hash.clone();
        let conn = self.get_connection().await?;
        let value: Option<String> = conn.hget(&hash, key).await?;
        Ok(value)
    }

    fn sink_type(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_fails_without_panicking() {
        let mut sink = RedisSink::new("not a url", "platina", "platina");
        assert!(sink.publish("watchdog.enable", "false").await.is_err());
        assert!(sink.get("eeprom.DeviceVersion").await.is_err());
        assert_eq!(sink.sink_type(), "redis");
    }
}
