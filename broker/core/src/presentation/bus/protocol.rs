// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Wire frames and method dispatch
//!
//! Newline-delimited JSON. The server greets every connection with its
//! unique name, then answers calls by serial and pushes signals at any time:
//!
//! ```text
//! ◀ {"type":"hello","unique_name":":1.4","version":1}
//! ▶ {"serial":7,"call":{"method":"AddTransaction","args":["foo,0,1.0,1,x86_64,repoA","install"]}}
//! ◀ {"type":"signal","name":"TransactionEvent","args":["start-build",null]}
//! ◀ {"type":"reply","serial":7,"result":[["foo,0,1.0,1,x86_64,repoA","install"]]}
//! ◀ {"type":"error","serial":8,"name":"org.pkgbroker.System.LockedByOther","message":"..."}
//! ```
//!
//! Arguments are positional, in the order of the method signature.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

use crate::application::error::{ServiceError, INTERFACE};
use crate::application::service::PackageService;
use crate::application::transaction::resolution_value;
use crate::domain::events::DaemonSignal;
use crate::domain::identity::Caller;
use crate::domain::package::Verb;

pub const PROTOCOL_VERSION: u32 = 1;

/// Longest accepted line, in bytes.
pub const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub serial: u64,
    pub call: RawCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCall {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Hello { unique_name: String, version: u32 },
    Reply { serial: u64, result: Value },
    Error { serial: u64, name: String, message: String },
    Signal { name: String, args: Value },
}

impl ServerFrame {
    pub fn signal(signal: &DaemonSignal) -> Self {
        Self::Signal {
            name: signal.name().to_string(),
            args: signal.args(),
        }
    }

    pub fn failure(serial: u64, error: &ServiceError) -> Self {
        Self::Error {
            serial,
            name: error.bus_name(),
            message: error.to_string(),
        }
    }

    pub fn outcome(serial: u64, result: Result<Value, ServiceError>) -> Self {
        match result {
            Ok(result) => Self::Reply { serial, result },
            Err(e) => Self::failure(serial, &e),
        }
    }
}

/// Transport failures on either end of the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("socket {}: {source}", .path.display())]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exists but is not a socket", .0.display())]
    NotASocket(PathBuf),

    #[error("connection closed")]
    Closed,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame codec: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("{name}: {message}")]
    Remote { name: String, message: String },
}

/// A parsed bus method call.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    GetVersion,
    Lock,
    Unlock,
    Exit,
    SetWatchdogState { enabled: bool },
    GetPackages { filter: String },
    GetPackagesByName { pattern: String, newest_only: bool },
    GetAttribute { id: String, attribute: String },
    GetPackageWithAttributes { filter: String, fields: Vec<String> },
    Search {
        fields: Vec<String>,
        keys: Vec<String>,
        match_all: bool,
        newest_only: bool,
    },
    GetRepositories { filter: String },
    GetRepo { repo_id: String },
    GetGroups,
    GetGroupPackages { group_id: String, filter: String },
    GetUpdateInfo { id: String },
    GetConfig { setting: String },
    SetConfig { setting: String, value: Value },
    SetEnabledRepos { repo_ids: Vec<String> },
    AddTransaction { id: String, verb: String },
    ClearTransaction,
    GetTransaction,
    BuildTransaction,
    RunTransaction,
    ConfirmGpgImport { key_id: String, granted: bool },
    /// `Install`, `Remove`, `Update`, `Reinstall`, `Downgrade`.
    StageCommands { verb: Verb, cmds: String },
}

struct Args {
    method: String,
    values: std::vec::IntoIter<Value>,
}

impl Args {
    fn next<T: serde::de::DeserializeOwned>(&mut self, name: &str) -> Result<T, ServiceError> {
        let value = self.values.next().ok_or_else(|| {
            ServiceError::InvalidArgument(format!("{}: missing argument '{}'", self.method, name))
        })?;
        serde_json::from_value(value).map_err(|e| {
            ServiceError::InvalidArgument(format!("{}: argument '{}': {}", self.method, name, e))
        })
    }

    fn finish<T>(mut self, call: T) -> Result<T, ServiceError> {
        match self.values.next() {
            None => Ok(call),
            Some(_) => Err(ServiceError::InvalidArgument(format!(
                "{}: too many arguments",
                self.method
            ))),
        }
    }
}

impl MethodCall {
    pub fn parse(raw: RawCall) -> Result<Self, ServiceError> {
        let mut args = Args {
            method: raw.method.clone(),
            values: raw.args.into_iter(),
        };
        let call = match raw.method.as_str() {
            "GetVersion" => Self::GetVersion,
            "Lock" => Self::Lock,
            "Unlock" => Self::Unlock,
            "Exit" => Self::Exit,
            "SetWatchdogState" => Self::SetWatchdogState {
                enabled: args.next("state")?,
            },
            "GetPackages" => Self::GetPackages {
                filter: args.next("pkg_filter")?,
            },
            "GetPackagesByName" => Self::GetPackagesByName {
                pattern: args.next("pattern")?,
                newest_only: args.next("newest_only")?,
            },
            "GetAttribute" => Self::GetAttribute {
                id: args.next("id")?,
                attribute: args.next("attr")?,
            },
            "GetPackageWithAttributes" => Self::GetPackageWithAttributes {
                filter: args.next("pkg_filter")?,
                fields: args.next("fields")?,
            },
            "Search" => Self::Search {
                fields: args.next("fields")?,
                keys: args.next("keys")?,
                match_all: args.next("match_all")?,
                newest_only: args.next("newest_only")?,
            },
            "GetRepositories" => Self::GetRepositories {
                filter: args.next("filter")?,
            },
            "GetRepo" => Self::GetRepo {
                repo_id: args.next("repo_id")?,
            },
            "GetGroups" => Self::GetGroups,
            "GetGroupPackages" => Self::GetGroupPackages {
                group_id: args.next("grp_id")?,
                filter: args.next("grp_flt")?,
            },
            "GetUpdateInfo" => Self::GetUpdateInfo { id: args.next("id")? },
            "GetConfig" => Self::GetConfig {
                setting: args.next("setting")?,
            },
            "SetConfig" => Self::SetConfig {
                setting: args.next("setting")?,
                value: args.next("value")?,
            },
            "SetEnabledRepos" => Self::SetEnabledRepos {
                repo_ids: args.next("repo_ids")?,
            },
            "AddTransaction" => Self::AddTransaction {
                id: args.next("id")?,
                verb: args.next("action")?,
            },
            "ClearTransaction" => Self::ClearTransaction,
            "GetTransaction" => Self::GetTransaction,
            "BuildTransaction" => Self::BuildTransaction,
            "RunTransaction" => Self::RunTransaction,
            "ConfirmGPGImport" => Self::ConfirmGpgImport {
                key_id: args.next("key_id")?,
                granted: args.next("confirmed")?,
            },
            "Install" | "Remove" | "Update" | "Reinstall" | "Downgrade" => {
                let verb = match raw.method.as_str() {
                    "Install" => Verb::Install,
                    "Remove" => Verb::Remove,
                    "Update" => Verb::Update,
                    "Reinstall" => Verb::Reinstall,
                    _ => Verb::Downgrade,
                };
                Self::StageCommands {
                    verb,
                    cmds: args.next("cmds")?,
                }
            }
            other => {
                return Err(ServiceError::InvalidArgument(format!(
                    "unknown method '{}' on {}",
                    other, INTERFACE
                )))
            }
        };
        args.finish(call)
    }
}

/// Execute a parsed call against the service and shape the reply.
pub async fn dispatch(service: &PackageService, caller: &Caller, call: MethodCall) -> Result<Value, ServiceError> {
    let value = match call {
        MethodCall::GetVersion => json!(service.get_version()),
        MethodCall::Lock => json!(service.lock(caller).await?),
        MethodCall::Unlock => json!(service.unlock(caller).await?),
        MethodCall::Exit => json!(service.exit(caller).await?),
        MethodCall::SetWatchdogState { enabled } => json!(service.set_watchdog_state(caller, enabled).await?),
        MethodCall::GetPackages { filter } => json!(service.get_packages(caller, &filter).await?),
        MethodCall::GetPackagesByName { pattern, newest_only } => {
            json!(service.get_packages_by_name(caller, &pattern, newest_only).await?)
        }
        MethodCall::GetAttribute { id, attribute } => service.get_attribute(caller, &id, &attribute).await?,
        MethodCall::GetPackageWithAttributes { filter, fields } => {
            service.get_package_with_attributes(caller, &filter, fields).await?
        }
        MethodCall::Search {
            fields,
            keys,
            match_all,
            newest_only,
        } => json!(service.search(caller, fields, keys, match_all, newest_only).await?),
        MethodCall::GetRepositories { filter } => json!(service.get_repositories(caller, &filter).await?),
        MethodCall::GetRepo { repo_id } => service.get_repo(caller, &repo_id).await?,
        MethodCall::GetGroups => json!(service.get_groups(caller).await?),
        MethodCall::GetGroupPackages { group_id, filter } => {
            json!(service.get_group_packages(caller, &group_id, &filter).await?)
        }
        MethodCall::GetUpdateInfo { id } => service.get_update_info(caller, &id).await?,
        MethodCall::GetConfig { setting } => service.get_config(caller, &setting).await?,
        MethodCall::SetConfig { setting, value } => json!(service.set_config(caller, &setting, value).await?),
        MethodCall::SetEnabledRepos { repo_ids } => {
            service.set_enabled_repos(caller, repo_ids).await?;
            Value::Null
        }
        MethodCall::AddTransaction { id, verb } => json!(service.add_transaction(caller, &id, &verb).await?),
        MethodCall::ClearTransaction => {
            service.clear_transaction(caller).await?;
            Value::Null
        }
        MethodCall::GetTransaction => json!(service.get_transaction(caller).await?),
        MethodCall::BuildTransaction => resolution_value(&service.build_transaction(caller).await?),
        MethodCall::RunTransaction => json!(service.run_transaction(caller).await?.code()),
        MethodCall::ConfirmGpgImport { key_id, granted } => {
            service.confirm_gpg_import(caller, &key_id, granted).await?;
            Value::Null
        }
        MethodCall::StageCommands { verb, cmds } => {
            resolution_value(&service.stage_commands(caller, verb, &cmds).await?)
        }
    };
    Ok(value)
}
