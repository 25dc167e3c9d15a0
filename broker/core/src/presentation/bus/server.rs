// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Bus server
//!
//! Accepts peers on a Unix socket, names each one `:1.<n>` with a
//! process-wide counter, reads its kernel credentials, and serves its calls.
//!
//! # Per-connection tasks
//!
//! ```text
//!            ┌── call task ──┐
//! reader ────┼── call task ──┼──▶ mpsc ──▶ writer ──▶ socket
//!            └── ...         │      ▲
//! event bus ──▶ forwarder ───┘──────┘
//! ```
//!
//! Every call runs on its own task, so a long `RunTransaction` never holds
//! up `GetVersion` from the same or another peer. When the peer hangs up,
//! its in-flight calls are allowed to finish before the service forgets it.
//! On shutdown connections stop reading and flush the replies of calls
//! already running, within [`SHUTDOWN_GRACE`].
//!
//! The outbound queue holds at most [`OUTBOUND_QUEUE`] frames. Replies wait
//! for room; signals for a peer that stops reading are dropped.

use futures::{SinkExt, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::error::ServiceError;
use crate::application::service::PackageService;
use crate::domain::config::BusConfig;
use crate::domain::identity::{Caller, CallerIdentity, PeerCredentials};
use crate::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};
use crate::presentation::bus::protocol::{
    dispatch, BusError, CallFrame, MethodCall, ServerFrame, MAX_FRAME_LENGTH, PROTOCOL_VERSION,
};

static NEXT_PEER: AtomicU64 = AtomicU64::new(1);

/// How long connections may take to drain once shutdown begins.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Frames queued for one peer before its signals are dropped.
pub const OUTBOUND_QUEUE: usize = 256;

/// Names are never reused within one process.
fn next_unique_name() -> CallerIdentity {
    CallerIdentity::new(format!(":1.{}", NEXT_PEER.fetch_add(1, Ordering::SeqCst)))
}

fn socket_error(path: &Path, source: io::Error) -> BusError {
    BusError::Socket {
        path: path.to_path_buf(),
        source,
    }
}

pub struct BusServer {
    listener: UnixListener,
    path: PathBuf,
    service: Arc<PackageService>,
    signals: EventBus,
}

impl BusServer {
    /// Create the socket directory when missing, replace a stale socket, bind,
    /// and apply the configured mode.
    pub fn bind(config: &BusConfig, service: Arc<PackageService>, signals: EventBus) -> Result<Self, BusError> {
        let path = config.socket_path.clone();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| socket_error(parent, e))?;
            }
        }
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| socket_error(&path, e))?;
        set_socket_mode(&path, config.socket_mode)?;
        info!(socket = %path.display(), mode = %format!("{:o}", config.socket_mode), "Bus listening");

        Ok(Self {
            listener,
            path,
            service,
            signals,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accept peers until `shutdown` is cancelled, then remove the socket.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), BusError> {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let identity = next_unique_name();
                        let service = Arc::clone(&self.service);
                        let signals = self.signals.subscribe();
                        connections.spawn(serve_connection(stream, identity, service, signals, shutdown.clone()));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept bus connection"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "Connections did not drain in time, aborting");
            connections.abort_all();
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), error = %e, "Failed to remove bus socket");
            }
        }
        info!("Bus stopped");
        Ok(())
    }
}

fn remove_stale_socket(path: &Path) -> Result<(), BusError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(socket_error(path, e)),
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !metadata.file_type().is_socket() {
            return Err(BusError::NotASocket(path.to_path_buf()));
        }
    }
    std::fs::remove_file(path).map_err(|e| socket_error(path, e))?;
    debug!(socket = %path.display(), "Removed stale socket");
    Ok(())
}

#[cfg(unix)]
fn set_socket_mode(path: &Path, mode: u32) -> Result<(), BusError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| socket_error(path, e))
}

#[cfg(not(unix))]
fn set_socket_mode(_path: &Path, _mode: u32) -> Result<(), BusError> {
    Ok(())
}

fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    match stream.peer_cred() {
        Ok(cred) => Some(PeerCredentials {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        }),
        Err(e) => {
            warn!(error = %e, "Peer credentials unavailable");
            None
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    identity: CallerIdentity,
    service: Arc<PackageService>,
    signals: EventReceiver,
    shutdown: CancellationToken,
) {
    let caller = Arc::new(Caller::new(identity.clone(), peer_credentials(&stream)));
    info!(identity = %identity, uid = ?caller.uid(), "Peer connected");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());

    let (tx, mut rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let line = match serde_json::to_string(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if writer.send(line).await.is_err() {
                break;
            }
        }
    });

    let _ = tx
        .send(ServerFrame::Hello {
            unique_name: identity.to_string(),
            version: PROTOCOL_VERSION,
        })
        .await;

    let forwarder = tokio::spawn(forward_signals(signals, tx.clone(), identity.clone()));

    let mut calls = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = reader.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<CallFrame>(&line) {
                        Ok(frame) => {
                            let service = Arc::clone(&service);
                            let caller = Arc::clone(&caller);
                            let tx = tx.clone();
                            calls.spawn(async move {
                                let serial = frame.serial;
                                debug!(identity = %caller.identity, serial, method = %frame.call.method, "Call");
                                let result = match MethodCall::parse(frame.call) {
                                    Ok(call) => dispatch(&service, &caller, call).await,
                                    Err(e) => Err(e),
                                };
                                let _ = tx.send(ServerFrame::outcome(serial, result)).await;
                            });
                        }
                        Err(e) => {
                            warn!(identity = %identity, error = %e, "Malformed call frame");
                            let error = ServiceError::InvalidArgument(format!("malformed frame: {}", e));
                            let _ = tx.send(ServerFrame::failure(0, &error)).await;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(identity = %identity, error = %e, "Bus read failed");
                    break;
                }
                None => break,
            },
            Some(_) = calls.join_next(), if !calls.is_empty() => {}
        }
    }

    while calls.join_next().await.is_some() {}
    forwarder.abort();
    drop(tx);
    let _ = writer_task.await;

    service.peer_disconnected(&identity).await;
    info!(identity = %identity, "Peer disconnected");
}

/// Copy broadcast signals into the peer's queue without waiting on it.
/// Returns how many were dropped because the queue was full.
async fn forward_signals(mut signals: EventReceiver, tx: mpsc::Sender<ServerFrame>, identity: CallerIdentity) -> u64 {
    let mut dropped = 0;
    loop {
        match signals.recv().await {
            Ok(signal) => match tx.try_send(ServerFrame::signal(&signal)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    metrics::counter!("pkgbroker_signals_dropped_total").increment(1);
                    debug!(identity = %identity, signal = signal.name(), "Peer queue full, signal dropped");
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    if dropped > 0 {
        warn!(identity = %identity, dropped, "Signals dropped for a slow peer");
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DaemonSignal, TransactionPhase};

    #[test]
    fn test_unique_names_are_not_reused() {
        let a = next_unique_name();
        let b = next_unique_name();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(":1."));
    }

    #[test]
    fn test_regular_file_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.sock");
        std::fs::write(&path, b"not a socket").unwrap();
        assert!(matches!(remove_stale_socket(&path), Err(BusError::NotASocket(_))));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_full_queue_drops_signals_without_blocking() {
        let bus = EventBus::new(128);
        let (tx, mut rx) = mpsc::channel(4);
        let forwarder = tokio::spawn(forward_signals(bus.subscribe(), tx, next_unique_name()));

        for _ in 0..64 {
            bus.publish(DaemonSignal::TransactionEvent {
                phase: TransactionPhase::Download,
                data: None,
            });
        }
        drop(bus);

        let dropped = tokio::time::timeout(Duration::from_secs(5), forwarder)
            .await
            .expect("forwarder blocked on a full queue")
            .unwrap();
        assert_eq!(dropped, 60);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, 4);
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_peer_is_gone() {
        let bus = EventBus::new(16);
        let (tx, rx) = mpsc::channel(4);
        let forwarder = tokio::spawn(forward_signals(bus.subscribe(), tx, next_unique_name()));
        drop(rx);
        bus.publish(DaemonSignal::TransactionEvent {
            phase: TransactionPhase::StartRun,
            data: None,
        });
        let dropped = tokio::time::timeout(Duration::from_secs(5), forwarder).await.unwrap().unwrap();
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_missing_socket_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_stale_socket(&dir.path().join("absent.sock")).is_ok());
    }
}
