// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Package Service
//!
//! Application service behind every bus method: authorization, the session
//! lock, the engine lifecycle and the transaction pipeline.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Guard privileged calls, own the engine for the lock holder
//! - **Collaborators:**
//!   - Domain: SessionLock, WatchdogState, TrustLedger, PackageBackend
//!   - Infrastructure: AuthorizationAuthority, EngineFactory, SignalSink
//!
//! # Call Guards
//!
//! | Method | Authorize | Holder check | Resets idle ticks |
//! |--------|-----------|--------------|-------------------|
//! | `GetVersion` | no | no | no |
//! | `SetWatchdogState` | yes | no | no |
//! | `Lock`, `Exit` | yes | no | yes |
//! | everything else | yes | yes | yes |
//!
//! # Concurrency
//!
//! The holder check is a short read of a `parking_lot` lock, so non-holders
//! fail fast while the holder is busy. The engine sits behind a
//! `tokio::sync::Mutex` that serializes the holder's own overlapping calls;
//! engine work runs on the blocking pool. After acquiring the engine mutex the
//! holder is checked again, so an engine is never created for a session that
//! was released in the meantime.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::catalog;
use crate::application::error::ServiceError;
use crate::application::gate::AuthorizationGate;
use crate::application::transaction::{classify, RunOutcome, TransactionCallbacks};
use crate::domain::authorization::AuthorizationAuthority;
use crate::domain::backend::{BackendError, EngineFactory, PackageBackend, Resolution, StageTarget};
use crate::domain::events::{DaemonSignal, SignalSink, TransactionPhase};
use crate::domain::identity::{Caller, CallerIdentity};
use crate::domain::metadata::{CategorySummary, GroupFilter};
use crate::domain::package::{PackageId, TransactionMember, Verb};
use crate::domain::session::{LockError, SessionLock};
use crate::domain::trust::TrustLedger;
use crate::domain::watchdog::{WatchdogPolicy, WatchdogState, WorkGuard};

/// Reported by `GetVersion`.
pub const API_VERSION: i32 = 1;

/// The engine owned by the current session, created lazily.
struct EngineSlot {
    engine: Option<Box<dyn PackageBackend>>,
    factory: Arc<dyn EngineFactory>,
}

impl EngineSlot {
    fn get(&mut self) -> Result<&mut dyn PackageBackend, ServiceError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => self.factory.create().map_err(ServiceError::EngineInit)?,
        };
        Ok(&mut **self.engine.insert(engine))
    }

    /// Replace the engine with a fresh one. A failed creation leaves the slot
    /// empty; the next call retries.
    fn recycle(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.close();
        }
        match self.factory.create() {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => warn!(error = %e, "Engine recreation failed, retrying on next call"),
        }
    }

    fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.clear_staged();
            engine.close();
            debug!("Engine torn down");
        }
    }
}

/// Marks a transaction as running; `Exit` and the watchdog refuse to stop the
/// process while any guard is alive.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn engine_task_failed(e: JoinError) -> ServiceError {
    ServiceError::Backend(BackendError::Transaction(format!("engine task failed: {}", e)))
}

/// Snapshot for the health endpoint and `pkgbroker call`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub holder: Option<String>,
    pub locked: bool,
    pub watchdog_enabled: bool,
    pub idle_ticks: u64,
    pub busy: bool,
    pub transaction_running: bool,
}

pub struct PackageService {
    gate: AuthorizationGate,
    signals: Arc<dyn SignalSink>,
    session: RwLock<SessionLock>,
    engine: Arc<tokio::sync::Mutex<EngineSlot>>,
    trust: Arc<Mutex<TrustLedger>>,
    watchdog: WatchdogState,
    policy: WatchdogPolicy,
    running_transactions: AtomicUsize,
    shutdown: CancellationToken,
}

impl PackageService {
    pub fn new(
        authority: Arc<dyn AuthorizationAuthority>,
        factory: Arc<dyn EngineFactory>,
        signals: Arc<dyn SignalSink>,
        policy: WatchdogPolicy,
        watchdog_enabled: bool,
    ) -> Self {
        Self {
            gate: AuthorizationGate::new(authority),
            signals,
            session: RwLock::new(SessionLock::new()),
            engine: Arc::new(tokio::sync::Mutex::new(EngineSlot {
                engine: None,
                factory,
            })),
            trust: Arc::new(Mutex::new(TrustLedger::new())),
            watchdog: WatchdogState::new(watchdog_enabled),
            policy,
            running_transactions: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    // ========================================================================
    // Guards
    // ========================================================================

    fn check_holder(&self, identity: &CallerIdentity) -> Result<(), ServiceError> {
        self.session
            .read()
            .check(identity)
            .map_err(|_| ServiceError::LockedByOther)
    }

    async fn privileged(&self, caller: &Caller) -> Result<WorkGuard<'_>, ServiceError> {
        self.gate.authorize(caller).await?;
        Ok(self.watchdog.begin_work())
    }

    async fn locked(&self, caller: &Caller) -> Result<WorkGuard<'_>, ServiceError> {
        self.gate.authorize(caller).await?;
        self.check_holder(&caller.identity)?;
        Ok(self.watchdog.begin_work())
    }

    /// Run `f` on the blocking pool with exclusive access to the session's
    /// engine slot, after re-checking that `identity` still holds the lock.
    async fn with_slot<T, F>(&self, identity: &CallerIdentity, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut EngineSlot) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let mut slot = self.engine.clone().lock_owned().await;
        self.check_holder(identity)?;
        tokio::task::spawn_blocking(move || f(&mut slot))
            .await
            .map_err(engine_task_failed)?
    }

    async fn with_engine<T, F>(&self, identity: &CallerIdentity, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut dyn PackageBackend) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.with_slot(identity, move |slot| Ok(f(slot.get()?))).await
    }

    /// Clear the holder and tear the engine down. With `expected`, only when
    /// that identity still holds the lock. Returns whether a release happened.
    async fn release_session(&self, expected: Option<&CallerIdentity>) -> Result<bool, ServiceError> {
        let mut slot = self.engine.clone().lock_owned().await;
        let previous = {
            let mut session = self.session.write();
            match expected {
                Some(identity) => match session.release(identity) {
                    Ok(()) => Some(identity.clone()),
                    Err(LockError::LockedByOther) => return Ok(false),
                },
                None => session.evict(),
            }
        };
        tokio::task::spawn_blocking(move || slot.teardown())
            .await
            .map_err(engine_task_failed)?;
        if let Some(holder) = previous {
            info!(identity = %holder, "Session released");
        }
        Ok(true)
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub fn get_version(&self) -> i32 {
        API_VERSION
    }

    /// Take the session lock and start the engine. `false` when anyone,
    /// including the caller, already holds it.
    pub async fn lock(&self, caller: &Caller) -> Result<bool, ServiceError> {
        let _work = self.privileged(caller).await?;
        let identity = &caller.identity;

        let reserved = self.session.write().reserve(identity);
        if !reserved {
            debug!(identity = %identity, "Lock refused, session already held");
            return Ok(false);
        }

        let mut slot = self.engine.clone().lock_owned().await;
        let created = tokio::task::spawn_blocking(move || slot.get().map(|_| ()))
            .await
            .unwrap_or_else(|e| {
                Err(ServiceError::EngineInit(BackendError::Initialization(e.to_string())))
            });

        if let Err(e) = created {
            let _ = self.session.write().release(identity);
            warn!(identity = %identity, error = %e, "Lock released, engine failed to start");
            return Err(e);
        }

        info!(identity = %identity, "Session locked");
        metrics::counter!("pkgbroker_lock_acquired_total").increment(1);
        Ok(true)
    }

    pub async fn unlock(&self, caller: &Caller) -> Result<bool, ServiceError> {
        let _work = self.locked(caller).await?;
        if !self.release_session(Some(&caller.identity)).await? {
            return Err(ServiceError::LockedByOther);
        }
        Ok(true)
    }

    /// Release everything and request process shutdown. Refused (`false`)
    /// while a transaction is running.
    pub async fn exit(&self, caller: &Caller) -> Result<bool, ServiceError> {
        let _work = self.privileged(caller).await?;
        if !self.can_quit() {
            info!(identity = %caller.identity, "Exit refused, transaction running");
            return Ok(false);
        }
        info!(identity = %caller.identity, "Exit requested");
        self.terminate().await;
        Ok(true)
    }

    /// Returns the new state. Does not count as activity.
    pub async fn set_watchdog_state(&self, caller: &Caller, enabled: bool) -> Result<bool, ServiceError> {
        self.gate.authorize(caller).await?;
        self.watchdog.set_enabled(enabled);
        info!(identity = %caller.identity, enabled, "Watchdog state changed");
        Ok(enabled)
    }

    /// Drop everything tied to a peer that left the bus. A departing holder
    /// releases the session as if it had called `Unlock`.
    pub async fn peer_disconnected(&self, identity: &CallerIdentity) {
        self.gate.forget(identity);
        let holds = self.session.read().is_held_by(identity);
        if !holds {
            return;
        }
        warn!(identity = %identity, "Lock holder disconnected, releasing session");
        if let Err(e) = self.release_session(Some(identity)).await {
            warn!(identity = %identity, error = %e, "Failed to release session of departed peer");
        }
    }

    /// Tear down the session unconditionally and signal shutdown.
    pub async fn terminate(&self) {
        if let Err(e) = self.release_session(None).await {
            warn!(error = %e, "Engine teardown failed during shutdown");
        }
        self.shutdown.cancel();
    }

    // ========================================================================
    // Package queries
    // ========================================================================

    pub async fn get_packages(&self, caller: &Caller, filter: &str) -> Result<Vec<PackageId>, ServiceError> {
        let _work = self.locked(caller).await?;
        let filter = filter.to_string();
        self.with_engine(&caller.identity, move |engine| catalog::get_packages(engine, &filter))
            .await
    }

    pub async fn get_packages_by_name(
        &self,
        caller: &Caller,
        pattern: &str,
        newest_only: bool,
    ) -> Result<Vec<PackageId>, ServiceError> {
        let _work = self.locked(caller).await?;
        let pattern = pattern.to_string();
        self.with_engine(&caller.identity, move |engine| {
            catalog::packages_by_name(engine, &pattern, newest_only)
        })
        .await
    }

    pub async fn get_attribute(&self, caller: &Caller, id: &str, attribute: &str) -> Result<Value, ServiceError> {
        let _work = self.locked(caller).await?;
        let (id, attribute) = (id.to_string(), attribute.to_string());
        self.with_engine(&caller.identity, move |engine| catalog::attribute(engine, &id, &attribute))
            .await
    }

    pub async fn get_package_with_attributes(
        &self,
        caller: &Caller,
        filter: &str,
        fields: Vec<String>,
    ) -> Result<Value, ServiceError> {
        let _work = self.locked(caller).await?;
        let filter = filter.to_string();
        self.with_engine(&caller.identity, move |engine| {
            catalog::package_with_attributes(engine, &filter, &fields)
        })
        .await
    }

    pub async fn search(
        &self,
        caller: &Caller,
        fields: Vec<String>,
        keys: Vec<String>,
        match_all: bool,
        newest_only: bool,
    ) -> Result<Vec<PackageId>, ServiceError> {
        let _work = self.locked(caller).await?;
        self.with_engine(&caller.identity, move |engine| {
            catalog::search(engine, &fields, &keys, match_all, newest_only)
        })
        .await
    }

    pub async fn get_repositories(&self, caller: &Caller, filter: &str) -> Result<Vec<String>, ServiceError> {
        let _work = self.locked(caller).await?;
        let filter = filter.to_string();
        self.with_engine(&caller.identity, move |engine| catalog::repositories(engine, &filter))
            .await
    }

    pub async fn get_repo(&self, caller: &Caller, repo_id: &str) -> Result<Value, ServiceError> {
        let _work = self.locked(caller).await?;
        let repo_id = repo_id.to_string();
        self.with_engine(&caller.identity, move |engine| catalog::repository(engine, &repo_id))
            .await
    }

    pub async fn get_groups(&self, caller: &Caller) -> Result<Vec<CategorySummary>, ServiceError> {
        let _work = self.locked(caller).await?;
        self.with_engine(&caller.identity, |engine| catalog::groups(engine)).await
    }

    /// `filter` is `all` or `default`.
    pub async fn get_group_packages(
        &self,
        caller: &Caller,
        group_id: &str,
        filter: &str,
    ) -> Result<Vec<PackageId>, ServiceError> {
        let _work = self.locked(caller).await?;
        let filter: GroupFilter = filter.parse().map_err(ServiceError::InvalidArgument)?;
        let group_id = group_id.to_string();
        self.with_engine(&caller.identity, move |engine| {
            catalog::group_packages(engine, &group_id, filter)
        })
        .await
    }

    pub async fn get_update_info(&self, caller: &Caller, id: &str) -> Result<Value, ServiceError> {
        let _work = self.locked(caller).await?;
        let id = id.to_string();
        self.with_engine(&caller.identity, move |engine| catalog::update_info(engine, &id))
            .await
    }

    pub async fn set_enabled_repos(&self, caller: &Caller, repo_ids: Vec<String>) -> Result<(), ServiceError> {
        let _work = self.locked(caller).await?;
        self.with_engine(&caller.identity, move |engine| engine.set_enabled_repositories(&repo_ids))
            .await
    }

    /// `*` returns every setting as an object; unknown settings are `null`.
    pub async fn get_config(&self, caller: &Caller, setting: &str) -> Result<Value, ServiceError> {
        let _work = self.locked(caller).await?;
        let setting = setting.to_string();
        self.with_engine(&caller.identity, move |engine| {
            engine.config_value(&setting).unwrap_or(Value::Null)
        })
        .await
    }

    /// Session-local; the next engine starts from the system defaults again.
    pub async fn set_config(&self, caller: &Caller, setting: &str, value: Value) -> Result<bool, ServiceError> {
        let _work = self.locked(caller).await?;
        let setting = setting.to_string();
        self.with_engine(&caller.identity, move |engine| engine.set_config_value(&setting, value))
            .await
    }

    // ========================================================================
    // Transaction pipeline
    // ========================================================================

    /// Stage one intent. `local-install` takes a file path instead of an id.
    /// A well-formed id that matches nothing stages nothing.
    pub async fn add_transaction(
        &self,
        caller: &Caller,
        id: &str,
        verb: &str,
    ) -> Result<Vec<TransactionMember>, ServiceError> {
        let _work = self.locked(caller).await?;
        let verb: Verb = verb.parse().map_err(ServiceError::InvalidArgument)?;
        let package = if verb == Verb::LocalInstall {
            None
        } else {
            let parsed = id
                .parse::<PackageId>()
                .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;
            Some(parsed)
        };
        let raw = id.to_string();

        self.with_engine(&caller.identity, move |engine| {
            let target = match package {
                None => StageTarget::LocalFile(raw),
                Some(id) => match catalog::decode(engine, &id) {
                    Some(record) => StageTarget::Package(record),
                    None => {
                        warn!(package = %id, "Package not found, nothing staged");
                        return Ok(Vec::new());
                    }
                },
            };
            match engine.stage(verb, target) {
                Ok(members) => Ok(members),
                Err(BackendError::PackageNotFound(what)) => {
                    warn!(package = %what, "Package not found, nothing staged");
                    Ok(Vec::new())
                }
                Err(e) => Err(ServiceError::Backend(e)),
            }
        })
        .await?
    }

    pub async fn clear_transaction(&self, caller: &Caller) -> Result<(), ServiceError> {
        let _work = self.locked(caller).await?;
        self.with_engine(&caller.identity, |engine| engine.clear_staged())
            .await
    }

    pub async fn get_transaction(&self, caller: &Caller) -> Result<Vec<TransactionMember>, ServiceError> {
        let _work = self.locked(caller).await?;
        self.with_engine(&caller.identity, |engine| engine.staged())
            .await
    }

    /// Resolve the staged set. Does not change it, so repeated builds agree.
    pub async fn build_transaction(&self, caller: &Caller) -> Result<Resolution, ServiceError> {
        let _work = self.locked(caller).await?;
        self.build(&caller.identity).await
    }

    async fn build(&self, identity: &CallerIdentity) -> Result<Resolution, ServiceError> {
        self.signals.emit(DaemonSignal::phase(TransactionPhase::StartBuild));
        let resolution = self.with_engine(identity, |engine| engine.resolve()).await?;
        self.signals.emit(DaemonSignal::phase(TransactionPhase::EndBuild));
        debug!(identity = %identity, code = resolution.code(), "Transaction built");
        Ok(resolution)
    }

    /// Stage every space-separated pattern in `cmds` with `verb`, then build.
    /// `*.rpm` arguments to an install are local files; an empty update
    /// means everything.
    pub async fn stage_commands(&self, caller: &Caller, verb: Verb, cmds: &str) -> Result<Resolution, ServiceError> {
        let _work = self.locked(caller).await?;
        let mut targets: Vec<(Verb, StageTarget)> = cmds
            .split(' ')
            .filter(|c| !c.is_empty())
            .map(|c| {
                if verb == Verb::Install && c.ends_with(".rpm") {
                    (Verb::LocalInstall, StageTarget::LocalFile(c.to_string()))
                } else {
                    (verb, StageTarget::Pattern(c.to_string()))
                }
            })
            .collect();
        if targets.is_empty() && verb == Verb::Update {
            targets.push((Verb::Update, StageTarget::Pattern(String::new())));
        }

        self.with_engine(&caller.identity, move |engine| {
            for (verb, target) in targets {
                match engine.stage(verb, target) {
                    Ok(_) => {}
                    Err(BackendError::PackageNotFound(what)) => {
                        warn!(package = %what, "Package not found, skipped")
                    }
                    Err(e) => return Err(ServiceError::Backend(e)),
                }
            }
            Ok(())
        })
        .await??;

        self.build(&caller.identity).await
    }

    /// Apply the staged set. Every outcome except a trust prompt replaces the
    /// engine afterwards, so no resolved state leaks into the next run.
    pub async fn run_transaction(&self, caller: &Caller) -> Result<RunOutcome, ServiceError> {
        let _work = self.locked(caller).await?;
        self.running_transactions.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard(&self.running_transactions);

        info!(identity = %caller.identity, "Running transaction");
        self.signals.emit(DaemonSignal::phase(TransactionPhase::StartRun));

        let signals = Arc::clone(&self.signals);
        let trust = Arc::clone(&self.trust);
        let outcome = self
            .with_slot(&caller.identity, move |slot| {
                let engine = slot.get()?;
                let mut callbacks = TransactionCallbacks::new(signals, trust);
                let result = engine.execute(&mut callbacks);
                let outcome = classify(result, callbacks.prompted());
                if outcome != RunOutcome::NeedsTrustConfirmation {
                    slot.recycle();
                }
                Ok(outcome)
            })
            .await?;

        match &outcome {
            RunOutcome::Success => {
                info!(identity = %caller.identity, "Transaction completed");
                self.signals.emit(DaemonSignal::phase(TransactionPhase::EndRun));
            }
            RunOutcome::NeedsTrustConfirmation => {
                info!(identity = %caller.identity, "Transaction suspended pending key confirmation");
            }
            RunOutcome::Failed(reason) => {
                warn!(identity = %caller.identity, reason = %reason, "Transaction failed");
                self.signals.emit(DaemonSignal::phase(TransactionPhase::Fail));
            }
        }
        metrics::counter!("pkgbroker_transactions_total", "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    /// Record the caller's answer for a prompted signing key. The next run
    /// uses it without prompting again.
    pub async fn confirm_gpg_import(&self, caller: &Caller, key_id: &str, granted: bool) -> Result<(), ServiceError> {
        let _work = self.locked(caller).await?;
        self.trust.lock().confirm(key_id, granted);
        info!(identity = %caller.identity, key_id, granted, "Signing key decision recorded");
        Ok(())
    }

    // ========================================================================
    // State for the watchdog and the health endpoint
    // ========================================================================

    pub fn watchdog(&self) -> &WatchdogState {
        &self.watchdog
    }

    pub fn policy(&self) -> WatchdogPolicy {
        self.policy
    }

    pub fn holder(&self) -> Option<CallerIdentity> {
        self.session.read().holder().cloned()
    }

    pub fn is_locked(&self) -> bool {
        self.session.read().is_locked()
    }

    pub fn can_quit(&self) -> bool {
        self.running_transactions.load(Ordering::SeqCst) == 0
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> ServiceStatus {
        let holder = self.holder();
        ServiceStatus {
            locked: holder.is_some(),
            holder: holder.map(|h| h.to_string()),
            watchdog_enabled: self.watchdog.is_enabled(),
            idle_ticks: self.watchdog.idle_ticks(),
            busy: self.watchdog.is_busy(),
            transaction_running: !self.can_quit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::PeerCredentials;
    use crate::infrastructure::authority::UidPolicyAuthority;
    use crate::infrastructure::memory_backend::{package, Catalog, MemoryEngineFactory, RepositoryCatalog};

    #[derive(Default)]
    struct Silent;

    impl SignalSink for Silent {
        fn emit(&self, _signal: DaemonSignal) {}
    }

    fn root(name: &str) -> Caller {
        Caller::new(
            CallerIdentity::new(name),
            Some(PeerCredentials {
                uid: 0,
                gid: 0,
                pid: None,
            }),
        )
    }

    fn service() -> (PackageService, MemoryEngineFactory) {
        let factory = MemoryEngineFactory::new(
            Catalog::default()
                .with_repository(RepositoryCatalog::new("repoA").with_package(package("foo", "1.0", "1", "x86_64"))),
        );
        let service = PackageService::new(
            Arc::new(UidPolicyAuthority::new(true, vec![])),
            Arc::new(factory.clone()),
            Arc::new(Silent),
            WatchdogPolicy::default(),
            true,
        );
        (service, factory)
    }

    #[tokio::test]
    async fn test_engine_exists_only_while_locked() {
        let (service, factory) = service();
        let a = root(":1.1");
        assert!(!factory.is_engine_open());

        assert!(service.lock(&a).await.unwrap());
        assert!(factory.is_engine_open());

        assert!(service.unlock(&a).await.unwrap());
        assert!(!factory.is_engine_open());
        assert!(service.holder().is_none());
    }

    #[tokio::test]
    async fn test_relock_by_holder_is_refused() {
        let (service, _) = service();
        let a = root(":1.1");
        assert!(service.lock(&a).await.unwrap());
        assert!(!service.lock(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_locked_calls_require_holder() {
        let (service, _) = service();
        let a = root(":1.1");
        let b = root(":1.2");

        assert!(matches!(
            service.get_packages(&a, "installed").await,
            Err(ServiceError::LockedByOther)
        ));
        service.lock(&a).await.unwrap();
        assert!(matches!(
            service.unlock(&b).await,
            Err(ServiceError::LockedByOther)
        ));
        assert!(service.get_packages(&a, "installed").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_caller_is_denied() {
        let (service, _) = service();
        let nobody = Caller::new(
            CallerIdentity::new(":1.7"),
            Some(PeerCredentials {
                uid: 1000,
                gid: 1000,
                pid: None,
            }),
        );
        assert!(matches!(service.lock(&nobody).await, Err(ServiceError::AccessDenied)));
        assert_eq!(service.get_version(), API_VERSION);
    }

    #[tokio::test]
    async fn test_add_transaction_argument_errors() {
        let (service, _) = service();
        let a = root(":1.1");
        service.lock(&a).await.unwrap();

        assert!(matches!(
            service.add_transaction(&a, "foo,0,1.0,1,x86_64,repoA", "explode").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            service.add_transaction(&a, "not-an-id", "install").await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(service
            .add_transaction(&a, "foo,0,9.9,1,x86_64,repoA", "install")
            .await
            .unwrap()
            .is_empty());
        assert!(service
            .add_transaction(&a, "/nowhere/foo.rpm", "localinstall")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_set_watchdog_state_keeps_idle_ticks() {
        let (service, _) = service();
        let a = root(":1.1");
        service.watchdog().tick(&service.policy(), false);
        service.watchdog().tick(&service.policy(), false);

        assert!(!service.set_watchdog_state(&a, false).await.unwrap());
        assert_eq!(service.watchdog().idle_ticks(), 2);
        assert!(!service.status().watchdog_enabled);
    }

    #[tokio::test]
    async fn test_exit_cancels_shutdown_token() {
        let (service, factory) = service();
        let a = root(":1.1");
        service.lock(&a).await.unwrap();

        assert!(service.exit(&a).await.unwrap());
        assert!(service.shutdown_token().is_cancelled());
        assert!(!factory.is_engine_open());
        assert!(!service.is_locked());
    }
}
