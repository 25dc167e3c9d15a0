// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Package Identity
//!
//! Clients never see engine package objects. Every package crosses the bus as
//! a [`PackageId`]: the comma-joined tuple
//!
//! ```text
//! name,epoch,version,release,arch,origin
//! foo,0,1.0,1,x86_64,updates          (available from repository "updates")
//! foo,0,1.0,1,x86_64,@installed       (installed)
//! ```
//!
//! ## Invariants
//!
//! - Encoding is a pure function of the six fields and preserves their order.
//! - A well-formed id (exactly six non-empty fields) always parses.
//! - An origin of `installed` or any `@`-prefixed value denotes the installed set.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FIELD_COUNT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageIdError {
    #[error("package id must have {FIELD_COUNT} comma separated fields, got {0}")]
    FieldCount(usize),

    #[error("package id field '{0}' is empty")]
    EmptyField(&'static str),
}

/// Name, epoch, version, release and architecture of a package build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nevra {
    pub name: String,
    #[serde(default = "default_epoch")]
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
}

fn default_epoch() -> String {
    "0".to_string()
}

impl Nevra {
    pub fn new(
        name: impl Into<String>,
        epoch: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
        }
    }

    /// Compare epoch, version and release the way rpm orders them.
    pub fn cmp_evr(&self, other: &Nevra) -> Ordering {
        let epoch = |e: &str| e.parse::<u64>().unwrap_or(0);
        epoch(&self.epoch)
            .cmp(&epoch(&other.epoch))
            .then_with(|| compare_version_segments(&self.version, &other.version))
            .then_with(|| compare_version_segments(&self.release, &other.release))
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch == "0" {
            write!(f, "{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
        } else {
            write!(
                f,
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        }
    }
}

/// rpmvercmp-style comparison: digit runs compare numerically, alpha runs
/// lexically, and a digit run is newer than an alpha run.
pub fn compare_version_segments(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        let mut current_is_digit = None;
        for c in s.chars() {
            if !c.is_ascii_alphanumeric() {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                current_is_digit = None;
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if current_is_digit.is_some_and(|d| d != is_digit) {
                out.push(std::mem::take(&mut current));
            }
            current_is_digit = Some(is_digit);
            current.push(c);
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    };

    let left = split(a);
    let right = split(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let l_digit = l.starts_with(|c: char| c.is_ascii_digit());
        let r_digit = r.starts_with(|c: char| c.is_ascii_digit());
        let ord = match (l_digit, r_digit) {
            (true, true) => {
                let l = l.trim_start_matches('0');
                let r = r.trim_start_matches('0');
                l.len().cmp(&r.len()).then_with(|| l.cmp(r))
            }
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

/// Provenance tag of a package id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Installed marker, kept verbatim (`installed`, `@installed`, `@updates`, ...).
    Installed(String),
    /// Repository identifier.
    Repository(String),
}

impl Origin {
    pub const INSTALLED: &'static str = "@installed";

    pub fn installed() -> Self {
        Self::Installed(Self::INSTALLED.to_string())
    }

    pub fn repository(id: impl Into<String>) -> Self {
        Self::Repository(id.into())
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "installed" || raw.starts_with('@') {
            Self::Installed(raw.to_string())
        } else {
            Self::Repository(raw.to_string())
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Installed(raw) | Self::Repository(raw) => raw,
        }
    }
}

/// Canonical, human-stable package handle used on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    pub nevra: Nevra,
    pub origin: Origin,
}

impl PackageId {
    pub fn new(nevra: Nevra, origin: Origin) -> Self {
        Self { nevra, origin }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.nevra.name,
            self.nevra.epoch,
            self.nevra.version,
            self.nevra.release,
            self.nevra.arch,
            self.origin.as_str()
        )
    }
}

impl FromStr for PackageId {
    type Err = PackageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != FIELD_COUNT {
            return Err(PackageIdError::FieldCount(fields.len()));
        }
        const NAMES: [&str; FIELD_COUNT] = ["name", "epoch", "version", "release", "arch", "origin"];
        for (field, name) in fields.iter().zip(NAMES) {
            if field.is_empty() {
                return Err(PackageIdError::EmptyField(name));
            }
        }
        Ok(Self {
            nevra: Nevra::new(fields[0], fields[1], fields[2], fields[3], fields[4]),
            origin: Origin::parse(fields[5]),
        })
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Engine-side package record, as much of it as the service needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    #[serde(flatten)]
    pub nevra: Nevra,
    #[serde(skip, default = "Origin::installed")]
    pub origin: Origin,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    /// Unix timestamp of the build.
    #[serde(default)]
    pub buildtime: i64,
    /// Names of packages this one needs.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Names of packages this one replaces.
    #[serde(default)]
    pub obsoletes: Vec<String>,
}

impl PackageRecord {
    pub fn new(nevra: Nevra, origin: Origin) -> Self {
        Self {
            nevra,
            origin,
            summary: String::new(),
            description: String::new(),
            size: 0,
            url: None,
            license: None,
            buildtime: 0,
            requires: Vec::new(),
            obsoletes: Vec::new(),
        }
    }

    pub fn id(&self) -> PackageId {
        PackageId::from(self)
    }

    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    pub fn is_installed(&self) -> bool {
        self.origin.is_installed()
    }
}

impl From<&PackageRecord> for PackageId {
    fn from(record: &PackageRecord) -> Self {
        PackageId::new(record.nevra.clone(), record.origin.clone())
    }
}

/// Staging verb for a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    #[serde(rename = "install")]
    Install,
    #[serde(rename = "update", alias = "obsolete")]
    Update,
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "reinstall")]
    Reinstall,
    #[serde(rename = "downgrade")]
    Downgrade,
    #[serde(rename = "localinstall", alias = "local-install")]
    LocalInstall,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Reinstall => "reinstall",
            Self::Downgrade => "downgrade",
            Self::LocalInstall => "localinstall",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "update" | "obsolete" => Ok(Self::Update),
            "remove" => Ok(Self::Remove),
            "reinstall" => Ok(Self::Reinstall),
            "downgrade" => Ok(Self::Downgrade),
            "localinstall" | "local-install" => Ok(Self::LocalInstall),
            other => Err(format!("unknown transaction verb '{}'", other)),
        }
    }
}

/// One staged intent as reported back to the client: `(package id, verb)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMember {
    pub package: PackageId,
    pub verb: Verb,
}

impl TransactionMember {
    pub fn new(package: PackageId, verb: Verb) -> Self {
        Self { package, verb }
    }
}

impl Serialize for TransactionMember {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.package, self.verb).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TransactionMember {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (package, verb) = <(PackageId, Verb)>::deserialize(deserializer)?;
        Ok(Self { package, verb })
    }
}

/// Named package listings understood by `GetPackages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFilter {
    Installed,
    Available,
    Updates,
    Obsoletes,
    Recent,
    Extras,
}

impl FromStr for PackageFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installed" => Ok(Self::Installed),
            "available" => Ok(Self::Available),
            "updates" => Ok(Self::Updates),
            "obsoletes" => Ok(Self::Obsoletes),
            "recent" => Ok(Self::Recent),
            "extras" => Ok(Self::Extras),
            other => Err(format!("unknown package filter '{}'", other)),
        }
    }
}

/// Compile a shell-style name pattern (`*`, `?`, `[...]`). An invalid
/// pattern matches nothing.
pub fn name_pattern(pattern: &str) -> Option<glob::Pattern> {
    glob::Pattern::new(pattern).ok()
}

/// Whether `text` matches `pattern`; `false` for an invalid pattern.
pub fn matches_pattern(pattern: Option<&glob::Pattern>, text: &str) -> bool {
    pattern.is_some_and(|p| p.matches(text))
}
