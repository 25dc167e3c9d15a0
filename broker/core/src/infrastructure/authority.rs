// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;

use crate::domain::authorization::{AuthorityError, AuthorizationAuthority};
use crate::domain::config::AuthorizationConfig;
use crate::domain::identity::Caller;

/// Grants by peer uid: root when `allow_root`, plus an explicit allow-list.
#[derive(Debug, Clone)]
pub struct UidPolicyAuthority {
    allow_root: bool,
    allowed_uids: Vec<u32>,
}

impl UidPolicyAuthority {
    pub fn new(allow_root: bool, allowed_uids: Vec<u32>) -> Self {
        Self {
            allow_root,
            allowed_uids,
        }
    }

    pub fn from_config(config: &AuthorizationConfig) -> Self {
        Self::new(config.allow_root, config.allowed_uids.clone())
    }
}

#[async_trait]
impl AuthorizationAuthority for UidPolicyAuthority {
    async fn check(&self, caller: &Caller) -> Result<bool, AuthorityError> {
        let uid = caller.uid().ok_or(AuthorityError::MissingCredentials)?;
        Ok((self.allow_root && uid == 0) || self.allowed_uids.contains(&uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{CallerIdentity, PeerCredentials};

    fn caller(uid: u32) -> Caller {
        Caller::new(
            CallerIdentity::new(":1.1"),
            Some(PeerCredentials {
                uid,
                gid: uid,
                pid: Some(4242),
            }),
        )
    }

    #[tokio::test]
    async fn test_root_and_allow_list() {
        let authority = UidPolicyAuthority::new(true, vec![1000]);
        assert!(authority.check(&caller(0)).await.unwrap());
        assert!(authority.check(&caller(1000)).await.unwrap());
        assert!(!authority.check(&caller(1001)).await.unwrap());
    }

    #[test]
    fn test_root_can_be_excluded() {
        let authority = UidPolicyAuthority::new(false, vec![]);
        let granted = tokio_test::block_on(authority.check(&caller(0))).unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_an_error() {
        let authority = UidPolicyAuthority::new(true, vec![]);
        let result = authority.check(&Caller::anonymous(":1.9")).await;
        assert!(matches!(result, Err(AuthorityError::MissingCredentials)));
    }
}
