// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Package Engine Contract
//!
//! The package-management engine (repository metadata, rpmdb, dependency
//! solver) is an external collaborator. The service reaches it through
//! [`PackageBackend`], created per mutation session by an [`EngineFactory`].
//!
//! ## Engine Lifecycle
//!
//! ```text
//! Lock()                      → EngineFactory::create()      (takes the engine's advisory lock)
//!   AddTransaction/Build/...  → PackageBackend methods        (serialized, one call at a time)
//!   RunTransaction()          → PackageBackend::execute(observer)
//!                             → close() + create()            (after success or failure)
//! Unlock() / eviction         → PackageBackend::close()       (releases the advisory lock)
//! ```
//!
//! Engines are not assumed thread-safe: the service never calls one
//! concurrently, but does call it from blocking worker threads, hence `Send`.

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::domain::events::{RpmProgress, TransactionPhase};
use crate::domain::metadata::{GroupCategory, UpdateAdvisory};
use crate::domain::package::{
    Nevra, PackageFilter, PackageId, PackageRecord, TransactionMember, Verb,
};

/// Result code of a successful dependency resolution (yum convention).
pub const RESOLVED_OK: i32 = 2;
/// Resolution finished but there was nothing to do.
pub const RESOLVED_EMPTY: i32 = 0;
/// Resolution failed; diagnostics are attached.
pub const RESOLVE_FAILED: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The engine could not be brought up (metadata, rpmdb, advisory lock).
    #[error("engine initialization failed: {0}")]
    Initialization(String),

    /// The engine's advisory lock is held by someone else.
    #[error("package database is locked by another process: {0}")]
    Locked(String),

    /// A package needed a signing key the operator has not accepted.
    #[error("signing key {key_id} was not imported")]
    UntrustedKey { key_id: String },

    /// No resolved plan could be produced for execution.
    #[error("transaction could not be resolved: {}", .0.join("; "))]
    Unresolved(Vec<String>),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

/// One row of a resolved plan: `(package id, size, obsoleted package ids)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub package: PackageId,
    pub size: u64,
    pub obsoletes: Vec<PackageId>,
}

impl Serialize for PlanEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.package)?;
        tuple.serialize_element(&self.size)?;
        tuple.serialize_element(&self.obsoletes)?;
        tuple.end()
    }
}

/// Plan rows sharing an action label (`install`, `update`, `remove`,
/// `downgrade`, `install-deps`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct PlanGroup {
    pub action: String,
    pub entries: Vec<PlanEntry>,
}

impl Serialize for PlanGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.action)?;
        tuple.serialize_element(&self.entries)?;
        tuple.end()
    }
}

/// Outcome of asking the engine to resolve the staged transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(Vec<PlanGroup>),
    Unresolved { code: i32, messages: Vec<String> },
}

impl Resolution {
    pub fn code(&self) -> i32 {
        match self {
            Self::Resolved(_) => RESOLVED_OK,
            Self::Unresolved { code, .. } => *code,
        }
    }
}

/// Target of a staging request.
#[derive(Debug, Clone, PartialEq)]
pub enum StageTarget {
    /// A package already resolved through the id codec.
    Package(PackageRecord),
    /// A name pattern (`Install("foo*")`); empty means "everything" for updates.
    Pattern(String),
    /// Path to a local package file.
    LocalFile(String),
}

/// Details of a signing key the engine wants to import.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyImportRequest {
    pub package: PackageId,
    pub signer: String,
    pub key_id: String,
    pub key_url: String,
    pub timestamp: i64,
}

/// Callbacks injected into [`PackageBackend::execute`].
pub trait ExecutionObserver {
    /// Download progress for one file.
    fn download_progress(&mut self, name: &str, fraction: f64, read_human: &str, eta_human: &str);

    /// The engine entered a new processing phase; `packages` lists the
    /// packages involved when the phase has any.
    fn transaction_phase(&mut self, phase: TransactionPhase, packages: Option<Vec<PackageId>>);

    /// Per-package step progress from the package installer.
    fn package_progress(&mut self, progress: RpmProgress);

    /// Ask whether the engine may import a signing key. Answered
    /// synchronously; `false` makes the engine fail with
    /// [`BackendError::UntrustedKey`].
    fn approve_key_import(&mut self, request: &KeyImportRequest) -> bool;
}

/// Repository summary exposed by `GetRepositories`/`GetRepo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub gpgcheck: bool,
    pub package_count: usize,
}

/// Narrow interface to one live engine instance.
pub trait PackageBackend: Send {
    /// Packages in a named listing.
    fn list(&self, filter: PackageFilter) -> Vec<PackageRecord>;

    /// Installed packages with an exact name/epoch/version/release/arch.
    fn search_installed(&self, nevra: &Nevra) -> Vec<PackageRecord>;

    /// `None` when the repository is unknown, otherwise the exact matches in it.
    fn search_repository(&self, repo_id: &str, nevra: &Nevra) -> Option<Vec<PackageRecord>>;

    /// Exact matches across every enabled repository.
    fn search_available(&self, nevra: &Nevra) -> Vec<PackageRecord>;

    /// Available packages whose name matches a glob.
    fn packages_by_name(&self, pattern: &str, newest_only: bool) -> Vec<PackageRecord>;

    /// Packages where any of `fields` contains a key; returns each hit with
    /// the number of distinct keys it matched.
    fn search(&self, fields: &[String], keys: &[String]) -> Vec<(PackageRecord, usize)>;

    /// Whether more than one version of this package may be installed at once.
    fn allows_multiple_installs(&self, record: &PackageRecord) -> bool;

    fn repositories(&self) -> Vec<RepositoryInfo>;

    /// Comps categories of the enabled repositories.
    fn categories(&self) -> Vec<GroupCategory>;

    /// The advisory that ships this exact build, if any.
    fn advisory_for(&self, nevra: &Nevra) -> Option<UpdateAdvisory>;

    /// Enable exactly the listed repositories.
    fn set_enabled_repositories(&mut self, repo_ids: &[String]);

    fn config_value(&self, setting: &str) -> Option<serde_json::Value>;

    /// Returns `false` when the setting does not exist or the value does not
    /// fit it.
    fn set_config_value(&mut self, setting: &str, value: serde_json::Value) -> bool;

    /// Stage an intent. A single intent may expand into several members.
    fn stage(&mut self, verb: Verb, target: StageTarget) -> Result<Vec<TransactionMember>, BackendError>;

    fn staged(&self) -> Vec<TransactionMember>;

    fn clear_staged(&mut self);

    /// Resolve the staged set. Must not mutate it.
    fn resolve(&mut self) -> Resolution;

    /// Apply the staged set, consuming it on success.
    fn execute(&mut self, observer: &mut dyn ExecutionObserver) -> Result<(), BackendError>;

    /// Flush, close, and release the advisory lock. Called exactly once.
    fn close(&mut self);
}

/// Creates engine instances; held for the whole process lifetime.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn PackageBackend>, BackendError>;
}
