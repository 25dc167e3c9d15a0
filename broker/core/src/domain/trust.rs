// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Signing-Key Trust Ledger
//!
//! ```text
//! Unknown ──engine asks──▶ Pending ──ConfirmGPGImport(k, b)──▶ Decided(b)
//!                                                                │
//!                                  ConfirmGPGImport(k, b') ◀─────┘ (overwrites, no prompt)
//! ```
//!
//! ## Invariants
//!
//! - A key is prompted at most once per process lifetime.
//! - `Pending` and `Decided(false)` both refuse the import.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    Pending,
    Decided(bool),
}

/// What the engine should do with a key import request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerdict {
    /// First sighting: the caller must be prompted; refuse for now.
    Prompt,
    Refuse,
    Accept,
}

#[derive(Debug, Default)]
pub struct TrustLedger {
    decisions: HashMap<String, TrustDecision>,
}

impl TrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn decision(&self, key_id: &str) -> Option<TrustDecision> {
        self.decisions.get(key_id).copied()
    }

    /// Consult the ledger for a key import, recording `Pending` on first sight.
    pub fn evaluate(&mut self, key_id: &str) -> KeyVerdict {
        match self.decisions.get(key_id) {
            None => {
                self.decisions
                    .insert(key_id.to_string(), TrustDecision::Pending);
                KeyVerdict::Prompt
            }
            Some(TrustDecision::Pending) | Some(TrustDecision::Decided(false)) => KeyVerdict::Refuse,
            Some(TrustDecision::Decided(true)) => KeyVerdict::Accept,
        }
    }

    pub fn confirm(&mut self, key_id: &str, granted: bool) {
        self.decisions
            .insert(key_id.to_string(), TrustDecision::Decided(granted));
    }
}
