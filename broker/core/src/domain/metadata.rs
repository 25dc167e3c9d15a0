// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Repository metadata beyond the package lists: comps groups arranged in
//! categories, and update advisories.

use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

use crate::domain::package::Nevra;

/// A comps group. Members are package names, not ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mandatory: Vec<String>,
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

impl PackageGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            mandatory: Vec::new(),
            default: Vec::new(),
            optional: Vec::new(),
        }
    }

    pub fn with_mandatory(mut self, name: impl Into<String>) -> Self {
        self.mandatory.push(name.into());
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default.push(name.into());
        self
    }

    pub fn with_optional(mut self, name: impl Into<String>) -> Self {
        self.optional.push(name.into());
        self
    }

    /// Member names selected by `filter`, in declaration order, without
    /// duplicates.
    pub fn members(&self, filter: GroupFilter) -> Vec<&str> {
        let optional: &[String] = match filter {
            GroupFilter::All => &self.optional,
            GroupFilter::Default => &[],
        };
        let mut names: Vec<&str> = Vec::new();
        for name in self.mandatory.iter().chain(&self.default).chain(optional) {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Names that decide whether the group counts as installed: the
    /// mandatory packages, or the default ones when none are mandatory.
    pub fn required_names(&self) -> &[String] {
        if self.mandatory.is_empty() {
            &self.default
        } else {
            &self.mandatory
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub groups: Vec<PackageGroup>,
}

impl GroupCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: PackageGroup) -> Self {
        self.groups.push(group);
        self
    }
}

/// Which members `GetGroupPackages` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter {
    /// Mandatory, default and optional packages.
    All,
    /// Mandatory and default packages.
    Default,
}

impl FromStr for GroupFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown group filter '{}'", other)),
        }
    }
}

/// Group row of the `GetGroups` tree: `[id, name, description, installed]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub installed: bool,
}

impl Serialize for GroupSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.id)?;
        tuple.serialize_element(&self.name)?;
        tuple.serialize_element(&self.description)?;
        tuple.serialize_element(&self.installed)?;
        tuple.end()
    }
}

/// Category node of the `GetGroups` tree:
/// `[[id, name, description], [group, ...]]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub groups: Vec<GroupSummary>,
}

impl Serialize for CategorySummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&(&self.id, &self.name, &self.description))?;
        tuple.serialize_element(&self.groups)?;
        tuple.end()
    }
}

/// An erratum shipped with repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAdvisory {
    pub id: String,
    /// `security`, `bugfix` or `enhancement`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Unix timestamp of publication.
    #[serde(default)]
    pub issued: i64,
    /// Bug tracker or CVE links.
    #[serde(default)]
    pub references: Vec<String>,
    /// Builds the advisory ships.
    #[serde(default)]
    pub packages: Vec<Nevra>,
}

impl UpdateAdvisory {
    pub fn covers(&self, nevra: &Nevra) -> bool {
        self.packages.iter().any(|p| p == nevra)
    }
}
