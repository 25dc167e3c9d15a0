// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Mutation Session Lock
//!
//! ```text
//! Unlocked ──reserve(id)──▶ Locked(id) ──release(id)──▶ Unlocked
//!                              │
//!                              └──evict()──▶ Unlocked     (watchdog, disconnect)
//! ```
//!
//! ## Invariants
//!
//! - At most one holder at any time.
//! - Only the holder may release; eviction bypasses that check.
//! - Reserving an already held lock fails, even for the same identity.

use thiserror::Error;

use crate::domain::identity::CallerIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("session is locked by another client")]
    LockedByOther,
}

#[derive(Debug, Default)]
pub struct SessionLock {
    holder: Option<CallerIdentity>,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<&CallerIdentity> {
        self.holder.as_ref()
    }

    pub fn is_locked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn is_held_by(&self, identity: &CallerIdentity) -> bool {
        self.holder.as_ref() == Some(identity)
    }

    /// Take the lock if nobody holds it. Returns whether it was taken.
    pub fn reserve(&mut self, identity: &CallerIdentity) -> bool {
        if self.holder.is_some() {
            return false;
        }
        self.holder = Some(identity.clone());
        true
    }

    pub fn check(&self, identity: &CallerIdentity) -> Result<(), LockError> {
        if self.is_held_by(identity) {
            Ok(())
        } else {
            Err(LockError::LockedByOther)
        }
    }

    pub fn release(&mut self, identity: &CallerIdentity) -> Result<(), LockError> {
        self.check(identity)?;
        self.holder = None;
        Ok(())
    }

    /// Forced release; returns the previous holder.
    pub fn evict(&mut self) -> Option<CallerIdentity> {
        self.holder.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let a = CallerIdentity::new(":1.1");
        let b = CallerIdentity::new(":1.2");
        let mut lock = SessionLock::new();

        assert!(lock.reserve(&a));
        assert!(!lock.reserve(&b));
        assert!(!lock.reserve(&a));
        assert!(lock.is_held_by(&a));
    }

    #[test]
    fn test_only_holder_releases() {
        let a = CallerIdentity::new(":1.1");
        let b = CallerIdentity::new(":1.2");
        let mut lock = SessionLock::new();
        lock.reserve(&a);

        assert_eq!(lock.release(&b), Err(LockError::LockedByOther));
        assert!(lock.release(&a).is_ok());
        assert!(!lock.is_locked());
        assert_eq!(lock.release(&a), Err(LockError::LockedByOther));
    }

    #[test]
    fn test_evict_bypasses_holder_check() {
        let a = CallerIdentity::new(":1.1");
        let mut lock = SessionLock::new();
        lock.reserve(&a);

        assert_eq!(lock.evict(), Some(a));
        assert!(!lock.is_locked());
        assert_eq!(lock.evict(), None);
    }
}
