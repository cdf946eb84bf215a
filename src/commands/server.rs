// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powerseq project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Line-oriented TCP listener for write commands
//!
//! One request per line:
//!
//! ```text
//! SET watchdog.enable true      -> OK
//! SET watchdog.enable maybe     -> ERR cannot set 'watchdog.enable': valid values are [...]
//! GET watchdog.enable           -> true
//! ```
//!
//! The value of `SET` is the rest of the line, so heartbeat sequence values
//! may contain spaces.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::WriteDispatcher;

/// TCP front end of a [`WriteDispatcher`]
pub struct CommandServer {
    listener: TcpListener,
    dispatcher: Arc<WriteDispatcher>,
}

impl CommandServer {
    /// Bind the listener
    ///
    /// # Arguments
    /// * `address` - Bind address, port 0 picks a free port
    /// * `dispatcher` - Shared write dispatcher
    pub async fn bind(
        address: &str,
        port: u16,
        dispatcher: Arc<WriteDispatcher>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((address, port))
            .await
            .with_context(|| format!("Failed to bind command server on {}:{}", address, port))?;
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `running` is cleared
    pub async fn serve(self, running: Arc<AtomicBool>) -> Result<()> {
        info!("Command server listening on {}", self.local_addr()?);
        while running.load(Ordering::SeqCst) {
            let accepted =
                tokio::time::timeout(Duration::from_secs(1), self.listener.accept()).await;
            match accepted {
                Err(_) => continue,
                Ok(Err(e)) => warn!("Command server accept failed: {}", e),
                Ok(Ok((stream, peer))) => {
                    debug!("Command connection from {}", peer);
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, dispatcher).await {
                            debug!("Command connection from {} closed: {}", peer, e);
                        }
                    });
                }
            }
        }
        info!("Command server stopped");
        Ok(())
    }
}

/// Answer one request line
pub async fn handle_line(dispatcher: &WriteDispatcher, line: &str) -> String {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb.to_ascii_uppercase().as_str() {
        "SET" => {
            let rest = rest.trim_start();
            let Some((field, value)) = rest.split_once(' ') else {
                return "ERR usage: SET <field> <value>".to_string();
            };
            match dispatcher.set(field, value.trim()).await {
                Ok(()) => "OK".to_string(),
                Err(e) => format!("ERR {}", e),
            }
        }
        "GET" => {
            let field = rest.trim();
            if dispatcher.registry().get(field).is_none() {
                return format!("ERR cannot get '{}': field is not writable", field);
            }
            dispatcher.get(field).await.unwrap_or_default()
        }
        _ => "ERR usage: SET <field> <value> | GET <field>".to_string(),
    }
}

async fn handle_connection(stream: TcpStream, dispatcher: Arc<WriteDispatcher>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&dispatcher, &line).await;
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}
