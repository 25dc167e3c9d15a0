// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::package::PackageId;

/// Lifecycle phases broadcast through `TransactionEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionPhase {
    StartBuild,
    EndBuild,
    StartRun,
    Download,
    PkgToDownload,
    SignatureCheck,
    RunTestTransaction,
    RunTransaction,
    EndRun,
    Fail,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartBuild => "start-build",
            Self::EndBuild => "end-build",
            Self::StartRun => "start-run",
            Self::Download => "download",
            Self::PkgToDownload => "pkg-to-download",
            Self::SignatureCheck => "signature-check",
            Self::RunTestTransaction => "run-test-transaction",
            Self::RunTransaction => "run-transaction",
            Self::EndRun => "end-run",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installer step for one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpmProgress {
    /// Package id, or a bare name when the installer only knows the name.
    pub package: String,
    /// `install`, `update`, `erase`, `obsolete`, `cleanup`, ...
    pub action: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub steps_done: u64,
    pub steps_total: u64,
}

/// Broadcast signals. Fire-and-forget: no reply, dropped without listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum DaemonSignal {
    UpdateProgress {
        name: String,
        fraction: f64,
        read_human: String,
        eta_human: String,
    },
    TransactionEvent {
        phase: TransactionPhase,
        data: Option<Vec<PackageId>>,
    },
    #[serde(rename = "RPMProgress")]
    RpmProgress(RpmProgress),
    #[serde(rename = "GPGImport")]
    GpgImport {
        package: PackageId,
        signer: String,
        key_id: String,
        key_url: String,
        timestamp: i64,
    },
}

impl DaemonSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateProgress { .. } => "UpdateProgress",
            Self::TransactionEvent { .. } => "TransactionEvent",
            Self::RpmProgress(_) => "RPMProgress",
            Self::GpgImport { .. } => "GPGImport",
        }
    }

    /// Positional arguments, in bus signal order.
    pub fn args(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::UpdateProgress {
                name,
                fraction,
                read_human,
                eta_human,
            } => json!([name, fraction, read_human, eta_human]),
            Self::TransactionEvent { phase, data } => json!([phase.as_str(), data]),
            Self::RpmProgress(p) => json!([
                p.package,
                p.action,
                p.bytes_done,
                p.bytes_total,
                p.steps_done,
                p.steps_total
            ]),
            Self::GpgImport {
                package,
                signer,
                key_id,
                key_url,
                timestamp,
            } => json!([package, signer, key_id, key_url, timestamp]),
        }
    }

    pub fn phase(phase: TransactionPhase) -> Self {
        Self::TransactionEvent { phase, data: None }
    }
}

/// Where the service sends signals. The event bus forwards them to
/// connected peers; tests record them.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: DaemonSignal);
}
