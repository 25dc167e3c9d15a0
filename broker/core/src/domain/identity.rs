// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};

/// Bus-assigned name of a connected peer (e.g. `:1.42`).
///
/// Stable for the lifetime of one connection and never handed out twice
/// within a process. Used as the lock holder token and as the key of the
/// authorization cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kernel-reported credentials of the process on the other end of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

/// Everything the service knows about whoever issued a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: CallerIdentity,
    pub credentials: Option<PeerCredentials>,
}

impl Caller {
    pub fn new(identity: CallerIdentity, credentials: Option<PeerCredentials>) -> Self {
        Self {
            identity,
            credentials,
        }
    }

    /// Caller without socket credentials; handy for in-process use and tests.
    pub fn anonymous(name: impl Into<String>) -> Self {
        Self::new(CallerIdentity::new(name), None)
    }

    pub fn uid(&self) -> Option<u32> {
        self.credentials.map(|c| c.uid)
    }
}
