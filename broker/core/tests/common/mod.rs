// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pkgbroker_core::application::service::PackageService;
use pkgbroker_core::domain::authorization::{AuthorityError, AuthorizationAuthority};
use pkgbroker_core::domain::events::{DaemonSignal, SignalSink, TransactionPhase};
use pkgbroker_core::domain::identity::{Caller, CallerIdentity, PeerCredentials};
use pkgbroker_core::domain::metadata::{GroupCategory, PackageGroup, UpdateAdvisory};
use pkgbroker_core::domain::package::Nevra;
use pkgbroker_core::domain::watchdog::WatchdogPolicy;
use pkgbroker_core::infrastructure::authority::UidPolicyAuthority;
use pkgbroker_core::infrastructure::memory_backend::{
    package, Catalog, MemoryEngineFactory, RepositoryCatalog, SigningKey,
};

pub const FOO_ID: &str = "foo,0,1.0,1,x86_64,repoA";
pub const FOO_INSTALLED_ID: &str = "foo,0,1.0,1,x86_64,@installed";
pub const SIGNED_ID: &str = "signed,0,2.0,1,noarch,repoB";
pub const SIGNING_KEY: &str = "K1";
pub const BAR_UPDATE_ID: &str = "bar,0,3.2,1,x86_64,repoA";
pub const BAR_ADVISORY: &str = "PKG-2026-0007";
pub const OTHER_SIGNED_ID: &str = "tools,0,0.5,3,x86_64,repoC";
pub const OTHER_SIGNING_KEY: &str = "K2";

/// Keeps every emitted signal, in order.
#[derive(Default)]
pub struct RecordingSink {
    signals: Mutex<Vec<DaemonSignal>>,
}

impl RecordingSink {
    pub fn signals(&self) -> Vec<DaemonSignal> {
        self.signals.lock().clone()
    }

    pub fn clear(&self) {
        self.signals.lock().clear();
    }

    pub fn phases(&self) -> Vec<TransactionPhase> {
        self.signals
            .lock()
            .iter()
            .filter_map(|s| match s {
                DaemonSignal::TransactionEvent { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    pub fn key_prompts(&self) -> Vec<String> {
        self.signals
            .lock()
            .iter()
            .filter_map(|s| match s {
                DaemonSignal::GpgImport { key_id, .. } => Some(key_id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SignalSink for RecordingSink {
    fn emit(&self, signal: DaemonSignal) {
        self.signals.lock().push(signal);
    }
}

/// Authority whose answer can be flipped between calls.
pub struct SwitchableAuthority {
    allowed: AtomicBool,
}

impl SwitchableAuthority {
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed: AtomicBool::new(allowed),
        }
    }

    pub fn set(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthorizationAuthority for SwitchableAuthority {
    async fn check(&self, _caller: &Caller) -> Result<bool, AuthorityError> {
        Ok(self.allowed.load(Ordering::SeqCst))
    }
}

pub fn root(name: &str) -> Caller {
    user(name, 0)
}

pub fn user(name: &str, uid: u32) -> Caller {
    Caller::new(
        CallerIdentity::new(name),
        Some(PeerCredentials {
            uid,
            gid: uid,
            pid: None,
        }),
    )
}

/// `foo` in `repoA`, packages signed with untrusted keys in `repoB` and
/// `repoC`, and `bar` already installed. `repoA` also ships a comps group
/// and an advisory for the `bar` update.
pub fn fixture_catalog() -> Catalog {
    Catalog::default()
        .with_installed(package("bar", "3.1", "2", "x86_64"))
        .with_repository(
            RepositoryCatalog::new("repoA")
                .with_package(package("foo", "1.0", "1", "x86_64"))
                .with_package(package("bar", "3.2", "1", "x86_64"))
                .with_category(
                    GroupCategory::new("system", "System").with_group(
                        PackageGroup::new("core-tools", "Core tools")
                            .with_mandatory("bar")
                            .with_default("foo")
                            .with_optional("tools"),
                    ),
                )
                .with_advisory(UpdateAdvisory {
                    id: BAR_ADVISORY.to_string(),
                    kind: "security".to_string(),
                    title: "bar security update".to_string(),
                    description: "Fixes a buffer overflow in the bar parser".to_string(),
                    issued: 1_767_225_600,
                    references: vec!["CVE-2026-0007".to_string()],
                    packages: vec![Nevra::new("bar", "0", "3.2", "1", "x86_64")],
                }),
        )
        .with_repository(
            RepositoryCatalog::new("repoB")
                .signed_by(SigningKey {
                    key_id: SIGNING_KEY.to_string(),
                    signer: "Repo B Signing <keys@repo-b.example>".to_string(),
                    url: "https://repo-b.example/RPM-GPG-KEY".to_string(),
                    timestamp: 1_700_000_000,
                })
                .with_package(package("signed", "2.0", "1", "noarch")),
        )
        .with_repository(
            RepositoryCatalog::new("repoC")
                .signed_by(SigningKey {
                    key_id: OTHER_SIGNING_KEY.to_string(),
                    signer: "Repo C Signing <keys@repo-c.example>".to_string(),
                    url: "https://repo-c.example/RPM-GPG-KEY".to_string(),
                    timestamp: 1_700_000_500,
                })
                .with_package(package("tools", "0.5", "3", "x86_64")),
        )
}

pub struct Harness {
    pub service: Arc<PackageService>,
    pub factory: MemoryEngineFactory,
    pub sink: Arc<RecordingSink>,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(UidPolicyAuthority::new(true, vec![])), WatchdogPolicy::default())
}

pub fn harness_with(authority: Arc<dyn AuthorizationAuthority>, policy: WatchdogPolicy) -> Harness {
    let factory = MemoryEngineFactory::new(fixture_catalog());
    let sink = Arc::new(RecordingSink::default());
    let service = Arc::new(PackageService::new(
        authority,
        Arc::new(factory.clone()),
        sink.clone(),
        policy,
        true,
    ));
    Harness {
        service,
        factory,
        sink,
    }
}
