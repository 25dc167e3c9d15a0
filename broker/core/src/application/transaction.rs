// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Transaction Execution
//!
//! Engine callbacks for `RunTransaction` and the mapping of execution results
//! to the in-band result codes.
//!
//! ## Result Codes
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Transaction applied |
//! | 1 | Signing key was prompted; answer with `ConfirmGPGImport` and re-run |
//! | 2 | Transaction failed; see the message and the `fail` event |

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::backend::{BackendError, ExecutionObserver, KeyImportRequest, Resolution};
use crate::domain::events::{DaemonSignal, RpmProgress, SignalSink, TransactionPhase};
use crate::domain::package::PackageId;
use crate::domain::trust::{KeyVerdict, TrustLedger};

/// Forwards engine progress to the signal sink and answers key imports from
/// the trust ledger.
pub struct TransactionCallbacks {
    signals: Arc<dyn SignalSink>,
    trust: Arc<Mutex<TrustLedger>>,
    prompted: Vec<String>,
}

impl TransactionCallbacks {
    pub fn new(signals: Arc<dyn SignalSink>, trust: Arc<Mutex<TrustLedger>>) -> Self {
        Self {
            signals,
            trust,
            prompted: Vec::new(),
        }
    }

    /// Keys the caller was asked about during this run.
    pub fn prompted(&self) -> &[String] {
        &self.prompted
    }
}

impl ExecutionObserver for TransactionCallbacks {
    fn download_progress(&mut self, name: &str, fraction: f64, read_human: &str, eta_human: &str) {
        self.signals.emit(DaemonSignal::UpdateProgress {
            name: name.to_string(),
            fraction,
            read_human: read_human.to_string(),
            eta_human: eta_human.to_string(),
        });
    }

    fn transaction_phase(&mut self, phase: TransactionPhase, packages: Option<Vec<PackageId>>) {
        debug!(phase = %phase, "Transaction phase");
        self.signals.emit(DaemonSignal::TransactionEvent {
            phase,
            data: packages,
        });
    }

    fn package_progress(&mut self, progress: RpmProgress) {
        self.signals.emit(DaemonSignal::RpmProgress(progress));
    }

    fn approve_key_import(&mut self, request: &KeyImportRequest) -> bool {
        let verdict = self.trust.lock().evaluate(&request.key_id);
        match verdict {
            KeyVerdict::Prompt => {
                info!(key_id = %request.key_id, signer = %request.signer, "Asking caller to confirm signing key");
                self.prompted.push(request.key_id.clone());
                self.signals.emit(DaemonSignal::GpgImport {
                    package: request.package.clone(),
                    signer: request.signer.clone(),
                    key_id: request.key_id.clone(),
                    key_url: request.key_url.clone(),
                    timestamp: request.timestamp,
                });
                false
            }
            KeyVerdict::Refuse => false,
            KeyVerdict::Accept => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Success,
    NeedsTrustConfirmation,
    Failed(String),
}

impl RunOutcome {
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NeedsTrustConfirmation => 1,
            Self::Failed(_) => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NeedsTrustConfirmation => "needs_trust_confirmation",
            Self::Failed(_) => "failed",
        }
    }
}

/// A refusal only asks for confirmation when the key was prompted during
/// this very run; a key refused earlier is a plain failure.
pub fn classify(result: Result<(), BackendError>, prompted: &[String]) -> RunOutcome {
    match result {
        Ok(()) => RunOutcome::Success,
        Err(BackendError::UntrustedKey { key_id }) if prompted.contains(&key_id) => {
            RunOutcome::NeedsTrustConfirmation
        }
        Err(e) => RunOutcome::Failed(e.to_string()),
    }
}

/// `[2, groups]` for a resolved plan, `[code, messages]` otherwise.
pub fn resolution_value(resolution: &Resolution) -> Value {
    match resolution {
        Resolution::Resolved(groups) => json!([resolution.code(), groups]),
        Resolution::Unresolved { code, messages } => json!([code, messages]),
    }
}
