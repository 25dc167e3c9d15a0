// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon wiring
//!
//! ```text
//!  SIGINT/SIGTERM ─┐
//!  Exit (bus) ─────┼──▶ PackageService::terminate ──▶ shutdown token
//!  watchdog ───────┘                                      │
//!                         bus server, health, watchdog ◀──┘ (all stop)
//! ```

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use pkgbroker_core::application::service::PackageService;
use pkgbroker_core::application::watchdog::WatchdogScheduler;
use pkgbroker_core::domain::config::DaemonConfig;
use pkgbroker_core::infrastructure::{EventBus, MemoryEngineFactory, UidPolicyAuthority};
use pkgbroker_core::presentation::{bus::BusServer, health};

pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(
        pid = std::process::id(),
        socket = %config.bus.socket_path.display(),
        watchdog = config.watchdog.enabled,
        "pkgbroker daemon starting"
    );

    if let Some(port) = config.observability.as_ref().and_then(|o| o.metrics_port) {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on {}", addr);
    }

    let signals = EventBus::with_default_capacity();
    let factory = MemoryEngineFactory::from_config(&config.backend).context("Failed to initialize package engine")?;
    let authority = UidPolicyAuthority::from_config(&config.authorization);

    let service = Arc::new(PackageService::new(
        Arc::new(authority),
        Arc::new(factory),
        Arc::new(signals.clone()),
        config.watchdog.policy(),
        config.watchdog.enabled,
    ));
    let shutdown = service.shutdown_token();

    let server = BusServer::bind(&config.bus, Arc::clone(&service), signals).context("Failed to bind bus socket")?;

    let watchdog = WatchdogScheduler::new(Arc::clone(&service), config.watchdog.tick_interval).spawn();

    let health = config.health.as_ref().map(|h| {
        tokio::spawn(health::serve(h.port, Arc::clone(&service), shutdown.clone()))
    });

    let on_signal = Arc::clone(&service);
    tokio::spawn(async move {
        shutdown_signal().await;
        on_signal.terminate().await;
    });

    server.serve(shutdown.clone()).await.context("Bus server failed")?;

    if let Err(e) = watchdog.await {
        warn!(error = %e, "Watchdog task ended abnormally");
    }
    if let Some(health) = health {
        match health.await {
            Ok(Err(e)) => error!(error = %e, "Health endpoint failed"),
            Err(e) => warn!(error = %e, "Health task ended abnormally"),
            Ok(Ok(())) => {}
        }
    }

    info!("pkgbroker daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgbroker_core::presentation::bus::BusClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_exit_stops_daemon_and_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.bus.socket_path = dir.path().join("bus.sock");
        // The test may not run as root.
        config.authorization.allowed_uids = vec![current_uid()];

        let socket = config.bus.socket_path.clone();
        let daemon = tokio::spawn(run_daemon(config));

        let mut client = loop {
            if let Ok(client) = BusClient::connect(&socket).await {
                break client;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(client.call("GetVersion", vec![]).await.unwrap(), json!(1));
        assert_eq!(client.call("Exit", vec![]).await.unwrap(), json!(true));

        tokio::time::timeout(std::time::Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!socket.exists());
    }

    /// Owner of a freshly created file is the effective uid.
    fn current_uid() -> u32 {
        use std::os::unix::fs::MetadataExt;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        std::fs::write(&marker, b"").unwrap();
        std::fs::metadata(&marker).unwrap().uid()
    }
}
