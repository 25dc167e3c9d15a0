// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Package Engine
//!
//! Reference [`PackageBackend`] backed by a YAML catalog. It keeps an
//! installed database, a set of repositories (optionally signed), local
//! package files, and the keyring, all shared between engine instances the
//! way an rpmdb is shared between processes.
//!
//! Resolution is deliberately shallow: `requires` are package names, pulled
//! from enabled repositories when missing. It exists so the daemon can be run
//! and tested end to end, not to solve dependencies.
//!
//! ## Advisory Lock
//!
//! At most one engine instance exists at a time. `create()` fails with
//! [`BackendError::Locked`] while another instance is open or while the lock
//! is held externally ([`MemoryEngineFactory::set_external_lock`]);
//! [`PackageBackend::close`] releases it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::backend::{
    BackendError, EngineFactory, ExecutionObserver, KeyImportRequest, PackageBackend, PlanEntry,
    PlanGroup, RepositoryInfo, Resolution, StageTarget, RESOLVED_EMPTY, RESOLVE_FAILED,
};
use crate::domain::config::BackendConfig;
use crate::domain::events::{RpmProgress, TransactionPhase};
use crate::domain::metadata::{GroupCategory, UpdateAdvisory};
use crate::domain::package::{
    matches_pattern, name_pattern, Nevra, Origin, PackageFilter, PackageId, PackageRecord, TransactionMember, Verb,
};

/// Origin given to packages installed from a local file.
pub const LOCAL_ORIGIN: &str = "commandline";

const INSTALL_ONLY_DEFAULT: &[&str] = &["kernel", "kernel-core", "kernel-modules"];
const RECENT_DAYS_DEFAULT: u64 = 7;
/// Upper bound accepted for the `recent` window.
const RECENT_DAYS_MAX: u64 = 36_500;

/// Order in which plan groups are reported.
const GROUP_ORDER: &[&str] = &[
    "install",
    "update",
    "remove",
    "reinstall",
    "downgrade",
    "install-deps",
    "remove-deps",
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    pub key_id: String,
    pub signer: String,
    pub url: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryCatalog {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Packages from a repository with a key are signature-checked.
    #[serde(default)]
    pub gpg_key: Option<SigningKey>,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
    /// Comps categories this repository ships.
    #[serde(default)]
    pub categories: Vec<GroupCategory>,
    #[serde(default)]
    pub advisories: Vec<UpdateAdvisory>,
}

impl RepositoryCatalog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            enabled: true,
            gpg_key: None,
            packages: Vec::new(),
            categories: Vec::new(),
            advisories: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: GroupCategory) -> Self {
        self.categories.push(category);
        self
    }

    pub fn with_advisory(mut self, advisory: UpdateAdvisory) -> Self {
        self.advisories.push(advisory);
        self
    }

    pub fn signed_by(mut self, key: SigningKey) -> Self {
        self.gpg_key = Some(key);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_package(mut self, record: PackageRecord) -> Self {
        self.packages.push(record);
        self
    }
}

/// Initial system state for a [`MemoryEngineFactory`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub installed: Vec<PackageRecord>,
    #[serde(default)]
    pub repositories: Vec<RepositoryCatalog>,
    /// Package files by path, for `localinstall`.
    #[serde(default)]
    pub local_packages: BTreeMap<String, PackageRecord>,
    /// Key ids already in the keyring.
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl Catalog {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_installed(mut self, record: PackageRecord) -> Self {
        self.installed.push(record);
        self
    }

    pub fn with_repository(mut self, repository: RepositoryCatalog) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn with_local_package(mut self, path: impl Into<String>, record: PackageRecord) -> Self {
        self.local_packages.insert(path.into(), record);
        self
    }

    pub fn with_trusted_key(mut self, key_id: impl Into<String>) -> Self {
        self.trusted_keys.push(key_id.into());
        self
    }

    /// Stamp every record with the origin implied by where it is listed.
    fn normalized(mut self) -> Self {
        for record in &mut self.installed {
            record.origin = Origin::installed();
        }
        for repo in &mut self.repositories {
            for record in &mut repo.packages {
                record.origin = Origin::repository(repo.id.clone());
            }
        }
        for record in self.local_packages.values_mut() {
            record.origin = Origin::repository(LOCAL_ORIGIN);
        }
        self.config
            .entry("recent".to_string())
            .or_insert_with(|| Value::from(RECENT_DAYS_DEFAULT));
        self.config
            .entry("installonlypkgs".to_string())
            .or_insert_with(|| Value::from(INSTALL_ONLY_DEFAULT.to_vec()));
        self.config
            .entry("skip_broken".to_string())
            .or_insert(Value::Bool(false));
        self
    }
}

/// Oldest build time that still counts as recent. A missing or out of range
/// window falls back to the default.
fn recent_cutoff(now: i64, days: Option<u64>) -> i64 {
    let window = |d: u64| i64::try_from(d).ok().and_then(|d| d.checked_mul(86_400));
    let seconds = days
        .filter(|d| *d <= RECENT_DAYS_MAX)
        .and_then(window)
        .or_else(|| window(RECENT_DAYS_DEFAULT))
        .unwrap_or(0);
    now.saturating_sub(seconds)
}

fn same_kind(current: &Value, proposed: &Value) -> bool {
    match (current, proposed) {
        (Value::Number(a), Value::Number(b)) => a.is_u64() == b.is_u64(),
        _ => std::mem::discriminant(current) == std::mem::discriminant(proposed),
    }
}

/// Shorthand for building catalog entries.
pub fn package(name: &str, version: &str, release: &str, arch: &str) -> PackageRecord {
    let mut record = PackageRecord::new(
        Nevra::new(name, "0", version, release, arch),
        Origin::installed(),
    );
    record.summary = format!("The {} package", name);
    record.size = 1024;
    record
}

#[derive(Debug)]
struct SystemState {
    installed: Vec<PackageRecord>,
    repositories: Vec<RepositoryCatalog>,
    local_packages: BTreeMap<String, PackageRecord>,
    trusted_keys: HashSet<String>,
    config: BTreeMap<String, Value>,
    engine_open: bool,
    external_lock: bool,
}

/// Creates [`MemoryBackend`] instances over one shared system state.
#[derive(Clone)]
pub struct MemoryEngineFactory {
    state: Arc<Mutex<SystemState>>,
}

impl MemoryEngineFactory {
    pub fn new(catalog: Catalog) -> Self {
        let catalog = catalog.normalized();
        Self {
            state: Arc::new(Mutex::new(SystemState {
                installed: catalog.installed,
                repositories: catalog.repositories,
                local_packages: catalog.local_packages,
                trusted_keys: catalog.trusted_keys.into_iter().collect(),
                config: catalog.config,
                engine_open: false,
                external_lock: false,
            })),
        }
    }

    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => {
                info!("Loading package catalog from {:?}", path);
                Catalog::from_yaml_file(path)
                    .map_err(|e| anyhow::anyhow!("Failed to load catalog at {:?}: {}", path, e))?
            }
            None => {
                warn!("No package catalog configured; starting with an empty system");
                Catalog::default()
            }
        };
        Ok(Self::new(catalog))
    }

    /// Simulate another process holding the package database lock.
    pub fn set_external_lock(&self, held: bool) {
        self.state.lock().external_lock = held;
    }

    pub fn is_engine_open(&self) -> bool {
        self.state.lock().engine_open
    }

    pub fn installed_ids(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.state.lock().installed.iter().map(PackageId::from).collect();
        ids.sort();
        ids
    }

    pub fn is_key_trusted(&self, key_id: &str) -> bool {
        self.state.lock().trusted_keys.contains(key_id)
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn create(&self) -> Result<Box<dyn PackageBackend>, BackendError> {
        let mut state = self.state.lock();
        if state.external_lock {
            return Err(BackendError::Locked("held by another process".to_string()));
        }
        if state.engine_open {
            return Err(BackendError::Locked(
                "held by another engine instance".to_string(),
            ));
        }
        state.engine_open = true;
        let enabled = state
            .repositories
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.id.clone())
            .collect();
        let config = state.config.clone();
        drop(state);

        debug!("Memory engine opened");
        Ok(Box::new(MemoryBackend {
            state: Arc::clone(&self.state),
            enabled,
            config,
            staged: Vec::new(),
            closed: false,
        }))
    }
}

#[derive(Debug, Clone)]
struct StagedOp {
    verb: Verb,
    record: PackageRecord,
}

impl StagedOp {
    fn member(&self) -> TransactionMember {
        TransactionMember::new(self.record.id(), self.verb)
    }
}

#[derive(Debug, Clone)]
struct PlannedOp {
    action: &'static str,
    record: PackageRecord,
    obsoletes: Vec<PackageRecord>,
}

impl PlannedOp {
    fn is_download(&self) -> bool {
        matches!(
            self.action,
            "install" | "update" | "reinstall" | "downgrade" | "install-deps"
        ) && self.record.origin != Origin::repository(LOCAL_ORIGIN)
    }

    fn rpm_action(&self) -> &'static str {
        match self.action {
            "remove" | "remove-deps" => "erase",
            "install-deps" => "install",
            other => other,
        }
    }
}

/// One open engine instance.
pub struct MemoryBackend {
    state: Arc<Mutex<SystemState>>,
    enabled: HashSet<String>,
    config: BTreeMap<String, Value>,
    staged: Vec<StagedOp>,
    closed: bool,
}

fn same_slot(a: &PackageRecord, b: &PackageRecord) -> bool {
    a.nevra.name == b.nevra.name && a.nevra.arch == b.nevra.arch
}

/// Newest record per (name, arch), sorted by id.
fn newest_by_name_arch(records: Vec<PackageRecord>) -> Vec<PackageRecord> {
    let mut newest: HashMap<(String, String), PackageRecord> = HashMap::new();
    for record in records {
        let key = (record.nevra.name.clone(), record.nevra.arch.clone());
        match newest.get(&key) {
            Some(current) if current.nevra.cmp_evr(&record.nevra) != Ordering::Less => {}
            _ => {
                newest.insert(key, record);
            }
        }
    }
    let mut out: Vec<PackageRecord> = newest.into_values().collect();
    out.sort_by_key(|r| r.id());
    out
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "k", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

impl MemoryBackend {
    fn available_in(&self, state: &SystemState) -> Vec<PackageRecord> {
        state
            .repositories
            .iter()
            .filter(|r| self.enabled.contains(&r.id))
            .flat_map(|r| r.packages.iter().cloned())
            .collect()
    }

    fn install_only(&self, name: &str) -> bool {
        match self.config.get("installonlypkgs") {
            Some(Value::Array(names)) => names.iter().any(|n| n.as_str() == Some(name)),
            _ => INSTALL_ONLY_DEFAULT.contains(&name),
        }
    }

    fn newest_installed_in<'a>(
        state: &'a SystemState,
        record: &PackageRecord,
    ) -> Option<&'a PackageRecord> {
        state
            .installed
            .iter()
            .filter(|i| same_slot(i, record))
            .max_by(|a, b| a.nevra.cmp_evr(&b.nevra))
    }

    fn push(&mut self, op: StagedOp) -> TransactionMember {
        let member = op.member();
        if !self.staged.iter().any(|s| s.member() == member) {
            debug!(package = %member.package, verb = %member.verb, "Staged");
            self.staged.push(op);
        }
        member
    }

    /// Turn one intent on a concrete record into a staged operation, or
    /// nothing when the intent is a no-op for the current system.
    fn plan_intent(&self, state: &SystemState, verb: Verb, record: PackageRecord) -> Option<StagedOp> {
        let exact_installed = state.installed.iter().find(|i| i.nevra == record.nevra).cloned();
        let newest_installed = Self::newest_installed_in(state, &record).cloned();
        let multi = self.install_only(record.name());

        match verb {
            Verb::Install | Verb::LocalInstall => {
                if record.is_installed() || exact_installed.is_some() {
                    return None;
                }
                match newest_installed {
                    Some(current) if !multi => {
                        if record.nevra.cmp_evr(&current.nevra) == Ordering::Greater {
                            Some(StagedOp { verb: Verb::Update, record })
                        } else {
                            None
                        }
                    }
                    _ => Some(StagedOp { verb: Verb::Install, record }),
                }
            }
            Verb::Update => {
                if record.is_installed() {
                    return None;
                }
                match newest_installed {
                    Some(current) => {
                        if record.nevra.cmp_evr(&current.nevra) != Ordering::Greater {
                            None
                        } else if multi {
                            Some(StagedOp { verb: Verb::Install, record })
                        } else {
                            Some(StagedOp { verb: Verb::Update, record })
                        }
                    }
                    None => {
                        let obsoletes_installed = state
                            .installed
                            .iter()
                            .any(|i| record.obsoletes.iter().any(|o| o == i.name()));
                        obsoletes_installed.then_some(StagedOp { verb: Verb::Update, record })
                    }
                }
            }
            Verb::Remove => exact_installed.map(|record| StagedOp { verb: Verb::Remove, record }),
            Verb::Reinstall => {
                exact_installed.as_ref()?;
                let available = if record.is_installed() {
                    self.available_in(state)
                        .into_iter()
                        .find(|a| a.nevra == record.nevra)?
                } else {
                    record
                };
                Some(StagedOp {
                    verb: Verb::Reinstall,
                    record: available,
                })
            }
            Verb::Downgrade => {
                if record.is_installed() || multi {
                    return None;
                }
                let current = newest_installed?;
                (current.nevra.cmp_evr(&record.nevra) == Ordering::Greater)
                    .then_some(StagedOp { verb: Verb::Downgrade, record })
            }
        }
    }

    fn expand_pattern(&self, state: &SystemState, verb: Verb, pattern: &str) -> Vec<PackageRecord> {
        let compiled = name_pattern(pattern);
        let matches = |r: &PackageRecord| pattern.is_empty() || matches_pattern(compiled.as_ref(), r.name());
        let installed: Vec<PackageRecord> = state.installed.iter().filter(|r| matches(r)).cloned().collect();
        let available: Vec<PackageRecord> = self.available_in(state).into_iter().filter(|r| matches(r)).collect();

        match verb {
            Verb::Install | Verb::LocalInstall | Verb::Update => newest_by_name_arch(available),
            Verb::Remove | Verb::Reinstall => installed,
            Verb::Downgrade => installed
                .iter()
                .filter_map(|current| {
                    available
                        .iter()
                        .filter(|a| same_slot(a, current))
                        .filter(|a| current.nevra.cmp_evr(&a.nevra) == Ordering::Greater)
                        .max_by(|a, b| a.nevra.cmp_evr(&b.nevra))
                        .cloned()
                })
                .collect(),
        }
    }

    fn compute_plan(&self, state: &SystemState) -> Result<Vec<PlannedOp>, Vec<String>> {
        let mut ops: Vec<PlannedOp> = Vec::new();
        for staged in &self.staged {
            let obsoletes = if staged.verb == Verb::Remove {
                Vec::new()
            } else {
                state
                    .installed
                    .iter()
                    .filter(|i| staged.record.obsoletes.iter().any(|o| o == i.name()))
                    .cloned()
                    .collect()
            };
            ops.push(PlannedOp {
                action: staged.verb.as_str(),
                record: staged.record.clone(),
                obsoletes,
            });
        }

        let removing = |ops: &[PlannedOp], name: &str| {
            ops.iter().any(|op| {
                matches!(op.action, "remove" | "remove-deps") && op.record.name() == name
            })
        };
        let provided = |ops: &[PlannedOp], name: &str| {
            let incoming = ops.iter().any(|op| {
                !matches!(op.action, "remove" | "remove-deps") && op.record.name() == name
            });
            let kept = state
                .installed
                .iter()
                .any(|i| i.name() == name && !removing(ops, name));
            incoming || kept
        };

        let available = self.available_in(state);
        let mut problems = Vec::new();
        let mut cursor = 0;
        while cursor < ops.len() {
            let op = ops[cursor].clone();
            cursor += 1;
            if matches!(op.action, "remove" | "remove-deps") {
                for dependent in state.installed.iter() {
                    let needs = dependent.requires.iter().any(|r| r == op.record.name());
                    let already = ops.iter().any(|o| o.record.nevra == dependent.nevra);
                    if needs && !already && !provided(&ops, op.record.name()) {
                        ops.push(PlannedOp {
                            action: "remove-deps",
                            record: dependent.clone(),
                            obsoletes: Vec::new(),
                        });
                    }
                }
                continue;
            }
            for required in &op.record.requires {
                if provided(&ops, required) {
                    continue;
                }
                let candidate = newest_by_name_arch(
                    available.iter().filter(|a| a.name() == required).cloned().collect(),
                )
                .into_iter()
                .next();
                match candidate {
                    Some(record) => ops.push(PlannedOp {
                        action: "install-deps",
                        record,
                        obsoletes: Vec::new(),
                    }),
                    None => problems.push(format!(
                        "package {} requires {}, but none of the providers can be installed",
                        op.record.nevra, required
                    )),
                }
            }
        }

        if problems.is_empty() {
            Ok(ops)
        } else {
            Err(problems)
        }
    }

    fn apply(&self, state: &mut SystemState, op: &PlannedOp) {
        let mut installed = op.record.clone();
        installed.origin = Origin::installed();
        let multi = self.install_only(op.record.name());
        match op.action {
            "install" | "install-deps" => state.installed.push(installed),
            "update" | "downgrade" => {
                if !multi {
                    state.installed.retain(|i| !same_slot(i, &op.record));
                }
                state.installed.push(installed);
            }
            "reinstall" => {
                state.installed.retain(|i| i.nevra != op.record.nevra);
                state.installed.push(installed);
            }
            _ => state.installed.retain(|i| i.nevra != op.record.nevra),
        }
        for obsoleted in &op.obsoletes {
            state.installed.retain(|i| i.nevra != obsoleted.nevra);
        }
    }
}

impl PackageBackend for MemoryBackend {
    fn list(&self, filter: PackageFilter) -> Vec<PackageRecord> {
        let state = self.state.lock();
        let available = self.available_in(&state);
        match filter {
            PackageFilter::Installed => state.installed.clone(),
            PackageFilter::Available => newest_by_name_arch(available),
            PackageFilter::Updates => newest_by_name_arch(available)
                .into_iter()
                .filter(|a| {
                    Self::newest_installed_in(&state, a)
                        .is_some_and(|i| a.nevra.cmp_evr(&i.nevra) == Ordering::Greater)
                })
                .collect(),
            PackageFilter::Obsoletes => available
                .into_iter()
                .filter(|a| {
                    state
                        .installed
                        .iter()
                        .any(|i| i.name() != a.name() && a.obsoletes.iter().any(|o| o == i.name()))
                })
                .collect(),
            PackageFilter::Recent => {
                let days = self.config.get("recent").and_then(Value::as_u64);
                let cutoff = recent_cutoff(chrono::Utc::now().timestamp(), days);
                available
                    .into_iter()
                    .filter(|a| a.buildtime > 0 && a.buildtime >= cutoff)
                    .collect()
            }
            PackageFilter::Extras => state
                .installed
                .iter()
                .filter(|i| !available.iter().any(|a| same_slot(a, i)))
                .cloned()
                .collect(),
        }
    }

    fn search_installed(&self, nevra: &Nevra) -> Vec<PackageRecord> {
        let state = self.state.lock();
        state.installed.iter().filter(|r| &r.nevra == nevra).cloned().collect()
    }

    fn search_repository(&self, repo_id: &str, nevra: &Nevra) -> Option<Vec<PackageRecord>> {
        let state = self.state.lock();
        let repo = state.repositories.iter().find(|r| r.id == repo_id)?;
        Some(repo.packages.iter().filter(|r| &r.nevra == nevra).cloned().collect())
    }

    fn search_available(&self, nevra: &Nevra) -> Vec<PackageRecord> {
        let state = self.state.lock();
        self.available_in(&state)
            .into_iter()
            .filter(|r| &r.nevra == nevra)
            .collect()
    }

    fn packages_by_name(&self, pattern: &str, newest_only: bool) -> Vec<PackageRecord> {
        let compiled = name_pattern(pattern);
        let state = self.state.lock();
        let mut found: Vec<PackageRecord> = self
            .available_in(&state)
            .into_iter()
            .chain(state.installed.iter().cloned())
            .filter(|r| matches_pattern(compiled.as_ref(), r.name()))
            .collect();
        if newest_only {
            found = newest_by_name_arch(found);
        }
        found
    }

    fn search(&self, fields: &[String], keys: &[String]) -> Vec<(PackageRecord, usize)> {
        let state = self.state.lock();
        let keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
        self.available_in(&state)
            .into_iter()
            .chain(state.installed.iter().cloned())
            .filter_map(|record| {
                let texts: Vec<String> = fields
                    .iter()
                    .filter_map(|field| match field.as_str() {
                        "name" => Some(record.nevra.name.clone()),
                        "summary" => Some(record.summary.clone()),
                        "description" => Some(record.description.clone()),
                        "url" => record.url.clone(),
                        "license" => record.license.clone(),
                        _ => None,
                    })
                    .map(|t| t.to_lowercase())
                    .collect();
                let hits = keys
                    .iter()
                    .filter(|k| texts.iter().any(|t| t.contains(k.as_str())))
                    .count();
                (hits > 0).then_some((record, hits))
            })
            .collect()
    }

    fn allows_multiple_installs(&self, record: &PackageRecord) -> bool {
        self.install_only(record.name())
    }

    fn repositories(&self) -> Vec<RepositoryInfo> {
        let state = self.state.lock();
        state
            .repositories
            .iter()
            .map(|r| RepositoryInfo {
                id: r.id.clone(),
                name: r.name.clone().unwrap_or_else(|| r.id.clone()),
                enabled: self.enabled.contains(&r.id),
                gpgcheck: r.gpg_key.is_some(),
                package_count: r.packages.len(),
            })
            .collect()
    }

    /// Categories with the same id are merged across repositories; the first
    /// definition of a group wins.
    fn categories(&self) -> Vec<GroupCategory> {
        let state = self.state.lock();
        let mut merged: Vec<GroupCategory> = Vec::new();
        for category in state
            .repositories
            .iter()
            .filter(|r| self.enabled.contains(&r.id))
            .flat_map(|r| r.categories.iter())
        {
            match merged.iter_mut().find(|c| c.id == category.id) {
                Some(existing) => {
                    for group in &category.groups {
                        if !existing.groups.iter().any(|g| g.id == group.id) {
                            existing.groups.push(group.clone());
                        }
                    }
                }
                None => merged.push(category.clone()),
            }
        }
        merged
    }

    fn advisory_for(&self, nevra: &Nevra) -> Option<UpdateAdvisory> {
        let state = self.state.lock();
        state
            .repositories
            .iter()
            .filter(|r| self.enabled.contains(&r.id))
            .flat_map(|r| r.advisories.iter())
            .find(|a| a.covers(nevra))
            .cloned()
    }

    fn set_enabled_repositories(&mut self, repo_ids: &[String]) {
        let state = self.state.lock();
        self.enabled = state
            .repositories
            .iter()
            .filter(|r| repo_ids.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
    }

    fn config_value(&self, setting: &str) -> Option<Value> {
        if setting == "*" {
            let all: serde_json::Map<String, Value> = self
                .config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Some(Value::Object(all));
        }
        self.config.get(setting).cloned()
    }

    fn set_config_value(&mut self, setting: &str, value: Value) -> bool {
        let Some(slot) = self.config.get_mut(setting) else {
            return false;
        };
        if !same_kind(slot, &value) {
            debug!(setting, "Config value of the wrong type refused");
            return false;
        }
        if setting == "recent" && !value.as_u64().is_some_and(|d| d <= RECENT_DAYS_MAX) {
            debug!(setting, "Recent window out of range refused");
            return false;
        }
        *slot = value;
        true
    }

    fn stage(&mut self, verb: Verb, target: StageTarget) -> Result<Vec<TransactionMember>, BackendError> {
        let ops: Vec<StagedOp> = {
            let state = self.state.lock();
            let candidates = match target {
                StageTarget::LocalFile(path) => {
                    let record = state
                        .local_packages
                        .get(&path)
                        .cloned()
                        .ok_or(BackendError::PackageNotFound(path))?;
                    vec![record]
                }
                StageTarget::Package(record) => vec![record],
                StageTarget::Pattern(pattern) => self.expand_pattern(&state, verb, &pattern),
            };
            candidates
                .into_iter()
                .filter_map(|record| self.plan_intent(&state, verb, record))
                .collect()
        };
        Ok(ops.into_iter().map(|op| self.push(op)).collect())
    }

    fn staged(&self) -> Vec<TransactionMember> {
        self.staged.iter().map(StagedOp::member).collect()
    }

    fn clear_staged(&mut self) {
        self.staged.clear();
    }

    fn resolve(&mut self) -> Resolution {
        if self.staged.is_empty() {
            return Resolution::Unresolved {
                code: RESOLVED_EMPTY,
                messages: vec!["Nothing to do".to_string()],
            };
        }
        let plan = {
            let state = self.state.lock();
            self.compute_plan(&state)
        };
        match plan {
            Ok(ops) => {
                let groups = GROUP_ORDER
                    .iter()
                    .filter_map(|action| {
                        let mut entries: Vec<PlanEntry> = ops
                            .iter()
                            .filter(|op| op.action == *action)
                            .map(|op| PlanEntry {
                                package: op.record.id(),
                                size: op.record.size,
                                obsoletes: op.obsoletes.iter().map(PackageId::from).collect(),
                            })
                            .collect();
                        if entries.is_empty() {
                            return None;
                        }
                        entries.sort_by(|a, b| a.package.cmp(&b.package));
                        Some(PlanGroup {
                            action: action.to_string(),
                            entries,
                        })
                    })
                    .collect();
                Resolution::Resolved(groups)
            }
            Err(messages) => Resolution::Unresolved {
                code: RESOLVE_FAILED,
                messages,
            },
        }
    }

    fn execute(&mut self, observer: &mut dyn ExecutionObserver) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Transaction("engine is closed".to_string()));
        }
        let ops = {
            let state = self.state.lock();
            self.compute_plan(&state).map_err(BackendError::Unresolved)?
        };
        if ops.is_empty() {
            return Ok(());
        }

        let downloads: Vec<&PlannedOp> = ops.iter().filter(|op| op.is_download()).collect();
        observer.transaction_phase(TransactionPhase::Download, None);
        if !downloads.is_empty() {
            observer.transaction_phase(
                TransactionPhase::PkgToDownload,
                Some(downloads.iter().map(|op| op.record.id()).collect()),
            );
            for op in &downloads {
                let file = format!("{}.rpm", op.record.nevra);
                observer.download_progress(&file, 1.0, &human_size(op.record.size), "00:00");
            }
        }

        observer.transaction_phase(TransactionPhase::SignatureCheck, None);
        for op in &downloads {
            let key = {
                let state = self.state.lock();
                state
                    .repositories
                    .iter()
                    .find(|r| Origin::repository(r.id.clone()) == op.record.origin)
                    .and_then(|r| r.gpg_key.clone())
                    .filter(|k| !state.trusted_keys.contains(&k.key_id))
            };
            let Some(key) = key else { continue };

            let request = KeyImportRequest {
                package: op.record.id(),
                signer: key.signer.clone(),
                key_id: key.key_id.clone(),
                key_url: key.url.clone(),
                timestamp: key.timestamp,
            };
            if !observer.approve_key_import(&request) {
                info!(key_id = %key.key_id, "Signing key import refused");
                return Err(BackendError::UntrustedKey { key_id: key.key_id });
            }
            info!(key_id = %key.key_id, "Signing key imported");
            self.state.lock().trusted_keys.insert(key.key_id);
        }

        observer.transaction_phase(TransactionPhase::RunTestTransaction, None);
        observer.transaction_phase(TransactionPhase::RunTransaction, None);

        let total = ops.len() as u64;
        for (step, op) in ops.iter().enumerate() {
            observer.package_progress(RpmProgress {
                package: op.record.id().to_string(),
                action: op.rpm_action().to_string(),
                bytes_done: op.record.size,
                bytes_total: op.record.size,
                steps_done: step as u64 + 1,
                steps_total: total,
            });
            let mut state = self.state.lock();
            self.apply(&mut state, op);
        }

        self.staged.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.staged.clear();
        self.state.lock().engine_open = false;
        debug!("Memory engine closed");
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.close();
    }
}
