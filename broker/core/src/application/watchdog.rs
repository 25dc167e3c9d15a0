// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Watchdog scheduler
//!
//! The only autonomous activity in the daemon. Ticks on a fixed interval,
//! and once the idle threshold for the current lock state is exceeded it
//! releases the session and cancels the service's shutdown token.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::application::service::PackageService;
use crate::domain::watchdog::TickOutcome;

pub struct WatchdogScheduler {
    service: Arc<PackageService>,
    interval: Duration,
}

impl WatchdogScheduler {
    pub fn new(service: Arc<PackageService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// One tick. Expiry while a transaction is running keeps waiting.
    pub async fn tick(&self) -> TickOutcome {
        let locked = self.service.is_locked();
        let outcome = self.service.watchdog().tick(&self.service.policy(), locked);
        match outcome {
            TickOutcome::Expired if self.service.can_quit() => {
                info!(
                    locked,
                    idle_ticks = self.service.watchdog().idle_ticks(),
                    "Idle timeout reached, shutting down"
                );
                self.service.terminate().await;
            }
            TickOutcome::Expired => {
                debug!("Idle timeout reached while a transaction runs, waiting");
            }
            TickOutcome::Idle(_) | TickOutcome::Skipped => {}
        }
        outcome
    }

    /// Tick until the service's shutdown token is cancelled, by this
    /// scheduler or by anyone else.
    pub fn spawn(self) -> JoinHandle<()> {
        let shutdown = self.service.shutdown_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("Watchdog stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DaemonSignal, SignalSink};
    use crate::domain::identity::{Caller, CallerIdentity, PeerCredentials};
    use crate::domain::watchdog::WatchdogPolicy;
    use crate::infrastructure::authority::UidPolicyAuthority;
    use crate::infrastructure::memory_backend::{Catalog, MemoryEngineFactory};

    struct Silent;

    impl SignalSink for Silent {
        fn emit(&self, _signal: DaemonSignal) {}
    }

    fn service(enabled: bool) -> (Arc<PackageService>, MemoryEngineFactory) {
        let factory = MemoryEngineFactory::new(Catalog::default());
        let service = PackageService::new(
            Arc::new(UidPolicyAuthority::new(true, vec![])),
            Arc::new(factory.clone()),
            Arc::new(Silent),
            WatchdogPolicy {
                idle_timeout: 2,
                locked_timeout: 4,
            },
            enabled,
        );
        (Arc::new(service), factory)
    }

    fn root() -> Caller {
        Caller::new(
            CallerIdentity::new(":1.1"),
            Some(PeerCredentials {
                uid: 0,
                gid: 0,
                pid: None,
            }),
        )
    }

    #[tokio::test]
    async fn test_idle_unlocked_expires() {
        let (service, _) = service(true);
        let scheduler = WatchdogScheduler::new(service.clone(), Duration::from_millis(10));

        assert_eq!(scheduler.tick().await, TickOutcome::Idle(1));
        assert_eq!(scheduler.tick().await, TickOutcome::Idle(2));
        assert_eq!(scheduler.tick().await, TickOutcome::Idle(3));
        assert_eq!(scheduler.tick().await, TickOutcome::Expired);
        assert!(service.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_locked_uses_longer_threshold_and_evicts() {
        let (service, factory) = service(true);
        service.lock(&root()).await.unwrap();
        let scheduler = WatchdogScheduler::new(service.clone(), Duration::from_millis(10));

        for expected in 1..=5 {
            assert_eq!(scheduler.tick().await, TickOutcome::Idle(expected));
        }
        assert_eq!(scheduler.tick().await, TickOutcome::Expired);
        assert!(!service.is_locked());
        assert!(!factory.is_engine_open());
        assert!(service.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_disabled_never_fires() {
        let (service, _) = service(false);
        let scheduler = WatchdogScheduler::new(service.clone(), Duration::from_millis(10));
        for _ in 0..10 {
            assert_eq!(scheduler.tick().await, TickOutcome::Skipped);
        }
        assert!(!service.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_spawned_scheduler_stops_the_service() {
        let (service, _) = service(true);
        let handle = WatchdogScheduler::new(service.clone(), Duration::from_millis(5)).spawn();
        tokio::time::timeout(Duration::from_secs(5), service.shutdown_token().cancelled())
            .await
            .unwrap();
        handle.await.unwrap();
    }
}
