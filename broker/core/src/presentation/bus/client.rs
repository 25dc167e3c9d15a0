// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Bus client
//!
//! Sequential client: one call in flight at a time. Signals that arrive
//! while waiting for a reply are queued and handed out by [`BusClient::next_signal`].

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::debug;

use crate::presentation::bus::protocol::{BusError, CallFrame, RawCall, ServerFrame, MAX_FRAME_LENGTH};

/// A signal as received: name and positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedSignal {
    pub name: String,
    pub args: Value,
}

pub struct BusClient {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
    unique_name: String,
    next_serial: u64,
    signals: VecDeque<ReceivedSignal>,
}

impl BusClient {
    /// Connect and wait for the server's hello.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|source| BusError::Socket {
            path: path.to_path_buf(),
            source,
        })?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            unique_name: String::new(),
            next_serial: 1,
            signals: VecDeque::new(),
        };

        match client.read_frame().await? {
            ServerFrame::Hello { unique_name, version } => {
                debug!(unique_name = %unique_name, version, "Connected to bus");
                client.unique_name = unique_name;
                Ok(client)
            }
            other => Err(BusError::Malformed(format!("expected hello, got {:?}", other))),
        }
    }

    /// Name the bus assigned to this connection.
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    async fn read_frame(&mut self) -> Result<ServerFrame, BusError> {
        let line = self.reader.next().await.ok_or(BusError::Closed)??;
        serde_json::from_str(&line).map_err(|e| BusError::Malformed(e.to_string()))
    }

    /// Call a method and wait for its reply. Bus errors come back as
    /// [`BusError::Remote`].
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value, BusError> {
        let serial = self.next_serial;
        self.next_serial += 1;
        let frame = CallFrame {
            serial,
            call: RawCall {
                method: method.to_string(),
                args,
            },
        };
        let line = serde_json::to_string(&frame).map_err(|e| BusError::Malformed(e.to_string()))?;
        self.writer.send(line).await?;

        loop {
            match self.read_frame().await? {
                ServerFrame::Reply { serial: s, result } if s == serial => return Ok(result),
                ServerFrame::Error {
                    serial: s,
                    name,
                    message,
                } if s == serial || s == 0 => return Err(BusError::Remote { name, message }),
                ServerFrame::Signal { name, args } => self.signals.push_back(ReceivedSignal { name, args }),
                other => debug!(frame = ?other, "Ignoring unrelated frame"),
            }
        }
    }

    /// Next signal, queued or fresh. `None` once the server hangs up.
    pub async fn next_signal(&mut self) -> Result<Option<ReceivedSignal>, BusError> {
        if let Some(signal) = self.signals.pop_front() {
            return Ok(Some(signal));
        }
        loop {
            match self.read_frame().await {
                Ok(ServerFrame::Signal { name, args }) => return Ok(Some(ReceivedSignal { name, args })),
                Ok(other) => debug!(frame = ?other, "Ignoring non-signal frame"),
                Err(BusError::Closed) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain signals already queued during earlier calls.
    pub fn take_signals(&mut self) -> Vec<ReceivedSignal> {
        self.signals.drain(..).collect()
    }
}
