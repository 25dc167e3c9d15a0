// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Health endpoint
//!
//! `GET /health` on loopback: uptime, lock holder and watchdog state.

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::service::PackageService;

#[derive(Clone)]
pub struct HealthState {
    service: Arc<PackageService>,
    started: Instant,
}

pub fn router(service: Arc<PackageService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::new(HealthState {
            service,
            started: Instant::now(),
        }))
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs(),
        "service": state.service.status(),
    }))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(port: u16, service: Arc<PackageService>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Health endpoint listening on {}", addr);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DaemonSignal, SignalSink};
    use crate::domain::watchdog::WatchdogPolicy;
    use crate::infrastructure::authority::UidPolicyAuthority;
    use crate::infrastructure::memory_backend::{Catalog, MemoryEngineFactory};

    struct Silent;

    impl SignalSink for Silent {
        fn emit(&self, _signal: DaemonSignal) {}
    }

    #[tokio::test]
    async fn test_health_reports_service_state() {
        let service = Arc::new(PackageService::new(
            Arc::new(UidPolicyAuthority::new(true, vec![])),
            Arc::new(MemoryEngineFactory::new(Catalog::default())),
            Arc::new(Silent),
            WatchdogPolicy::default(),
            false,
        ));
        let state = Arc::new(HealthState {
            service,
            started: Instant::now(),
        });

        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["locked"], false);
        assert_eq!(body["service"]["watchdog_enabled"], false);
        assert!(body["service"]["holder"].is_null());
    }
}
