// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Authorization Oracle
//!
//! The decision whether a peer may perform privileged package operations is
//! made outside this crate (a PolicyKit-style authority). The service only
//! needs a yes/no answer, so the contract is a single async method.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::identity::Caller;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority unavailable: {0}")]
    Unavailable(String),

    #[error("caller has no credentials")]
    MissingCredentials,
}

/// External yes/no authorization decision.
#[async_trait]
pub trait AuthorizationAuthority: Send + Sync {
    /// Ask whether `caller` may use privileged operations.
    ///
    /// `Ok(false)` is a definitive denial. Errors are treated as denials by
    /// the gate; neither outcome is cached.
    async fn check(&self, caller: &Caller) -> Result<bool, AuthorityError>;
}
