// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP driver for the local hardware-access service
//!
//! A batch is posted as a JSON array of [`RegisterOp`] and the service replies
//! with a JSON array of [`OpResult`] of the same length.

use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::Client;

use super::{HardwareTransport, OpResult, RegisterOp};

/// Hardware transport speaking JSON over HTTP
#[derive(Debug)]
pub struct HttpTransport {
    /// Endpoint of the batch call
    url: String,
    /// HTTP client, created on connect and reused for every batch
    client: Option<Client>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// # Arguments
    /// * `url` - Batch endpoint (e.g., "http://127.0.0.1:1233/i2c")
    pub fn new(url: &str) -> Result<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(anyhow!("Invalid hardware service URL: {}", url));
        }
        Ok(Self {
            url: url.to_string(),
            client: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl HardwareTransport for HttpTransport {
    async fn connect(&mut self) -> Result<()> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        self.client = Some(client);
        Ok(())
    }

    async fn batch_transact(&mut self, ops: &[RegisterOp]) -> Result<Vec<OpResult>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("Hardware transport not connected"))?;

        debug!("POST {} ({} slots)", self.url, ops.len());
        let response = client
            .post(&self.url)
            .json(ops)
            .send()
            .await
            .with_context(|| format!("Failed to reach hardware service at {}", self.url))?
            .error_for_status()
            .context("Hardware service rejected the batch")?;

        let results: Vec<OpResult> = response
            .json()
            .await
            .context("Malformed batch reply from hardware service")?;
        Ok(results)
    }
}
