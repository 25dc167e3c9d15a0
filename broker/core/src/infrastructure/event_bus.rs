// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for daemon signals
//
// In-memory signal fan-out using tokio broadcast channels. Every bus
// connection subscribes once; signals published with no subscriber are
// dropped.

use crate::domain::events::{DaemonSignal, SignalSink};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to daemon signals
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DaemonSignal>>,
}

impl EventBus {
    /// Capacity determines how many signals can be buffered before a slow
    /// subscriber starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, signal: DaemonSignal) {
        debug!(signal = signal.name(), "Publishing signal");

        let receiver_count = self.sender.send(signal).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to signal");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl SignalSink for EventBus {
    fn emit(&self, signal: DaemonSignal) {
        self.publish(signal);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all daemon signals
pub struct EventReceiver {
    receiver: broadcast::Receiver<DaemonSignal>,
}

impl EventReceiver {
    /// Receive the next signal (waits until one is available)
    pub async fn recv(&mut self) -> Result<DaemonSignal, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Signal receiver lagged by {} signals", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<DaemonSignal, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Signal receiver lagged by {} signals", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No signals available")]
    Empty,

    #[error("Receiver lagged by {0} signals (signals were dropped)")]
    Lagged(u64),
}
