// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Package Queries
//!
//! Read-side operations over an open engine: id decoding, listings,
//! attribute lookup and search.
//!
//! ## Invariants
//!
//! - Decoding matches all five nevra fields exactly or finds nothing.
//! - Every listing reports a package that is installed under its installed
//!   id, even when the candidate came from a repository.
//! - Listings are sorted and free of duplicates.

use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::backend::PackageBackend;
use crate::domain::metadata::{CategorySummary, GroupFilter, GroupSummary};
use crate::domain::package::{matches_pattern, name_pattern, PackageFilter, PackageId, PackageRecord};

/// `GetAttribute` result for an attribute name outside the allow-list.
pub const ATTRIBUTE_NONE: &str = ":none";
/// `GetAttribute` result for an id that is malformed or matches nothing.
pub const PACKAGE_NOT_FOUND: &str = ":not-found";

/// Plain attributes readable through `GetAttribute`.
pub const ATTRIBUTES: &[&str] = &[
    "name",
    "epoch",
    "version",
    "release",
    "arch",
    "repo_id",
    "summary",
    "description",
    "size",
    "url",
    "license",
    "requires",
    "obsoletes",
];

/// Resolve an id back to the engine's record.
pub fn decode(engine: &dyn PackageBackend, id: &PackageId) -> Option<PackageRecord> {
    let matches = if id.origin.is_installed() {
        engine.search_installed(&id.nevra)
    } else {
        match engine.search_repository(id.origin.as_str(), &id.nevra) {
            Some(found) => found,
            None => engine.search_available(&id.nevra),
        }
    };
    matches.into_iter().find(|r| r.nevra == id.nevra)
}

/// The id a listing should report for `record`.
pub fn canonical_id(engine: &dyn PackageBackend, record: &PackageRecord) -> PackageId {
    if record.is_installed() {
        return record.id();
    }
    engine
        .search_installed(&record.nevra)
        .first()
        .map(PackageRecord::id)
        .unwrap_or_else(|| record.id())
}

pub fn canonical_ids<'a>(
    engine: &dyn PackageBackend,
    records: impl IntoIterator<Item = &'a PackageRecord>,
) -> Vec<PackageId> {
    records
        .into_iter()
        .map(|r| canonical_id(engine, r))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Named listing; unknown filters list nothing.
pub fn get_packages(engine: &dyn PackageBackend, filter: &str) -> Vec<PackageId> {
    match filter.parse::<PackageFilter>() {
        Ok(filter) => canonical_ids(engine, &engine.list(filter)),
        Err(_) => Vec::new(),
    }
}

pub fn packages_by_name(engine: &dyn PackageBackend, pattern: &str, newest_only: bool) -> Vec<PackageId> {
    canonical_ids(engine, &engine.packages_by_name(pattern, newest_only))
}

fn plain_attribute(record: &PackageRecord, attribute: &str) -> Option<Value> {
    let value = match attribute {
        "name" => json!(record.nevra.name),
        "epoch" => json!(record.nevra.epoch),
        "version" => json!(record.nevra.version),
        "release" => json!(record.nevra.release),
        "arch" => json!(record.nevra.arch),
        "repo_id" => json!(record.origin.as_str()),
        "summary" => json!(record.summary),
        "description" => json!(record.description),
        "size" => json!(record.size),
        "url" => json!(record.url),
        "license" => json!(record.license),
        "requires" => json!(record.requires),
        "obsoletes" => json!(record.obsoletes),
        _ => return None,
    };
    Some(value)
}

/// Attribute value, a computed attribute, or one of the two sentinels.
pub fn attribute(engine: &dyn PackageBackend, raw_id: &str, attribute: &str) -> Value {
    let record = raw_id
        .parse::<PackageId>()
        .ok()
        .and_then(|id| decode(engine, &id));
    let Some(record) = record else {
        return json!(PACKAGE_NOT_FOUND);
    };

    match attribute {
        "action" => json!(action(engine, &record)),
        "downgrades" => json!(downgrades(engine, &record)),
        other => plain_attribute(&record, other).unwrap_or_else(|| json!(ATTRIBUTE_NONE)),
    }
}

fn newest_installed_named(engine: &dyn PackageBackend, name: &str) -> Option<PackageRecord> {
    engine
        .list(PackageFilter::Installed)
        .into_iter()
        .filter(|i| i.name() == name)
        .max_by(|a, b| a.nevra.cmp_evr(&b.nevra))
}

/// What a client can do with the package: `remove` when installed, else
/// `update`, `obsolete`, `downgrade` or `install`.
pub fn action(engine: &dyn PackageBackend, record: &PackageRecord) -> &'static str {
    if record.is_installed() || !engine.search_installed(&record.nevra).is_empty() {
        return "remove";
    }
    let id = record.id();
    if engine.list(PackageFilter::Updates).iter().any(|u| u.id() == id) {
        return "update";
    }
    if engine.list(PackageFilter::Obsoletes).iter().any(|o| o.id() == id) {
        return "obsolete";
    }
    match newest_installed_named(engine, record.name()) {
        Some(installed)
            if installed.nevra.cmp_evr(&record.nevra) == Ordering::Greater
                && !engine.allows_multiple_installs(record) =>
        {
            "downgrade"
        }
        _ => "install",
    }
}

/// For an installed package: the available versions it can be downgraded
/// to. For an available package: the installed package it would replace.
pub fn downgrades(engine: &dyn PackageBackend, record: &PackageRecord) -> Vec<PackageId> {
    let installed = record.is_installed() || !engine.search_installed(&record.nevra).is_empty();
    if installed {
        if engine.allows_multiple_installs(record) {
            return Vec::new();
        }
        let older: Vec<PackageRecord> = engine
            .packages_by_name(record.name(), false)
            .into_iter()
            .filter(|a| !a.is_installed() && a.nevra.arch == record.nevra.arch)
            .filter(|a| record.nevra.cmp_evr(&a.nevra) == Ordering::Greater)
            .collect();
        let mut ids: Vec<PackageId> = older.iter().map(PackageRecord::id).collect();
        ids.sort();
        ids.dedup();
        ids
    } else {
        engine
            .list(PackageFilter::Installed)
            .into_iter()
            .find(|i| i.name() == record.name() && i.nevra.arch == record.nevra.arch)
            .map(|i| vec![i.id()])
            .unwrap_or_default()
    }
}

/// Rows of `[id, field...]` for the `installed`, `available` and `updates`
/// listings. Unknown fields are skipped.
pub fn package_with_attributes(engine: &dyn PackageBackend, filter: &str, fields: &[String]) -> Value {
    let filter = match filter {
        "installed" => PackageFilter::Installed,
        "available" => PackageFilter::Available,
        "updates" => PackageFilter::Updates,
        _ => return json!([]),
    };
    let mut records = engine.list(filter);
    records.sort_by_key(|r| canonical_id(engine, r));
    let rows: Vec<Value> = records
        .iter()
        .map(|record| {
            let mut row = vec![json!(canonical_id(engine, record))];
            row.extend(fields.iter().filter_map(|f| plain_attribute(record, f)));
            Value::Array(row)
        })
        .collect();
    Value::Array(rows)
}

/// Keyword search. Without `match_all`, repository versions older than the
/// installed one are dropped; `newest_only` keeps the newest per name.
pub fn search(
    engine: &dyn PackageBackend,
    fields: &[String],
    keys: &[String],
    match_all: bool,
    newest_only: bool,
) -> Vec<PackageId> {
    let mut hits: Vec<PackageRecord> = engine
        .search(fields, keys)
        .into_iter()
        .filter(|(_, matched)| !match_all || *matched == keys.len())
        .map(|(record, _)| record)
        .collect();

    if !match_all {
        hits.retain(|record| {
            if record.is_installed() || engine.allows_multiple_installs(record) {
                return true;
            }
            match newest_installed_named(engine, record.name()) {
                Some(installed) => installed.nevra.cmp_evr(&record.nevra) != Ordering::Greater,
                None => true,
            }
        });
    }

    if newest_only {
        let mut newest: HashMap<String, PackageRecord> = HashMap::new();
        for record in hits {
            match newest.get(record.name()) {
                Some(current) if current.nevra.cmp_evr(&record.nevra) != Ordering::Less => {}
                _ => {
                    newest.insert(record.name().to_string(), record);
                }
            }
        }
        hits = newest.into_values().collect();
    }

    canonical_ids(engine, &hits)
}

/// Repository ids: `""`/`enabled`, `disabled`, or a glob over all ids.
pub fn repositories(engine: &dyn PackageBackend, filter: &str) -> Vec<String> {
    let compiled = name_pattern(filter);
    engine
        .repositories()
        .into_iter()
        .filter(|r| match filter {
            "" | "enabled" => r.enabled,
            "disabled" => !r.enabled,
            _ => matches_pattern(compiled.as_ref(), &r.id),
        })
        .map(|r| r.id)
        .collect()
}

pub fn repository(engine: &dyn PackageBackend, repo_id: &str) -> Value {
    engine
        .repositories()
        .into_iter()
        .find(|r| r.id == repo_id)
        .map(|r| json!(r))
        .unwrap_or(Value::Null)
}

/// The comps tree with categories and groups sorted by id. A group counts as
/// installed once every one of its required packages is.
pub fn groups(engine: &dyn PackageBackend) -> Vec<CategorySummary> {
    let installed: HashSet<String> = engine
        .list(PackageFilter::Installed)
        .into_iter()
        .map(|r| r.nevra.name)
        .collect();
    let mut tree: Vec<CategorySummary> = engine
        .categories()
        .into_iter()
        .map(|category| {
            let mut groups: Vec<GroupSummary> = category
                .groups
                .iter()
                .map(|group| {
                    let required = group.required_names();
                    GroupSummary {
                        id: group.id.clone(),
                        name: group.name.clone(),
                        description: group.description.clone(),
                        installed: !required.is_empty() && required.iter().all(|n| installed.contains(n)),
                    }
                })
                .collect();
            groups.sort();
            CategorySummary {
                id: category.id,
                name: category.name,
                description: category.description,
                groups,
            }
        })
        .collect();
    tree.sort();
    tree
}

/// One build per member name and arch: the installed one when present,
/// otherwise the newest available. An unknown group has no packages.
pub fn group_packages(engine: &dyn PackageBackend, group_id: &str, filter: GroupFilter) -> Vec<PackageId> {
    let Some(group) = engine
        .categories()
        .into_iter()
        .flat_map(|c| c.groups)
        .find(|g| g.id == group_id)
    else {
        return Vec::new();
    };

    let installed = engine.list(PackageFilter::Installed);
    let available = engine.list(PackageFilter::Available);
    let mut picked: Vec<PackageRecord> = Vec::new();
    for name in group.members(filter) {
        let local: Vec<&PackageRecord> = installed.iter().filter(|r| r.name() == name).collect();
        let candidates = if local.is_empty() {
            available.iter().filter(|r| r.name() == name).collect()
        } else {
            local
        };
        let mut newest: HashMap<&str, &PackageRecord> = HashMap::new();
        for record in candidates {
            match newest.get(record.nevra.arch.as_str()) {
                Some(current) if current.nevra.cmp_evr(&record.nevra) != Ordering::Less => {}
                _ => {
                    newest.insert(record.nevra.arch.as_str(), record);
                }
            }
        }
        picked.extend(newest.into_values().cloned());
    }
    canonical_ids(engine, &picked)
}

/// The advisory shipping this build, or `null` for an unknown id or a build
/// no advisory covers.
pub fn update_info(engine: &dyn PackageBackend, raw_id: &str) -> Value {
    raw_id
        .parse::<PackageId>()
        .ok()
        .and_then(|id| decode(engine, &id))
        .and_then(|record| engine.advisory_for(&record.nevra))
        .map(|advisory| json!(advisory))
        .unwrap_or(Value::Null)
}
