// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Authorization gate
//!
//! Asks the authority once per bus identity and remembers grants until the
//! peer disconnects. Denials and authority errors are never remembered, so a
//! caller that is granted later can still get in.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::error::ServiceError;
use crate::domain::authorization::AuthorizationAuthority;
use crate::domain::identity::{Caller, CallerIdentity};

pub struct AuthorizationGate {
    authority: Arc<dyn AuthorizationAuthority>,
    authorized: RwLock<HashSet<CallerIdentity>>,
}

impl AuthorizationGate {
    pub fn new(authority: Arc<dyn AuthorizationAuthority>) -> Self {
        Self {
            authority,
            authorized: RwLock::new(HashSet::new()),
        }
    }

    pub async fn authorize(&self, caller: &Caller) -> Result<(), ServiceError> {
        let cached = self.authorized.read().contains(&caller.identity);
        if cached {
            return Ok(());
        }

        match self.authority.check(caller).await {
            Ok(true) => {
                info!(identity = %caller.identity, uid = ?caller.uid(), "Caller authorized");
                self.authorized.write().insert(caller.identity.clone());
                Ok(())
            }
            Ok(false) => {
                warn!(identity = %caller.identity, uid = ?caller.uid(), "Authorization denied");
                metrics::counter!("pkgbroker_authorization_denied_total").increment(1);
                Err(ServiceError::AccessDenied)
            }
            Err(e) => {
                warn!(identity = %caller.identity, error = %e, "Authorization check failed");
                metrics::counter!("pkgbroker_authorization_denied_total").increment(1);
                Err(ServiceError::AccessDenied)
            }
        }
    }

    #[cfg(test)]
    pub fn is_authorized(&self, identity: &CallerIdentity) -> bool {
        self.authorized.read().contains(identity)
    }

    /// Drop the cached grant of a departed peer.
    pub fn forget(&self, identity: &CallerIdentity) {
        self.authorized.write().remove(identity);
    }
}
