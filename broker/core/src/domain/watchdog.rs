// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Idle Watchdog State
//!
//! Counts scheduler ticks without privileged activity. The scheduler itself
//! lives in [`crate::application::watchdog`]; this module holds the shared
//! counters and the per-tick decision so both can be tested without timers.
//!
//! ## Decision Table
//! | Disabled or busy | Locked | Idle ticks | Outcome |
//! |------------------|--------|-----------|---------|
//! | yes | - | - | `Skipped` (no increment) |
//! | no | no | > `idle_timeout` | `Expired` |
//! | no | yes | > `locked_timeout` | `Expired` |
//! | no | - | otherwise | `Idle(n + 1)` |

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Thresholds, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPolicy {
    /// Ticks tolerated while nobody holds the lock.
    pub idle_timeout: u64,
    /// Ticks tolerated while a client holds the lock but does nothing.
    pub locked_timeout: u64,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: 20,
            locked_timeout: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped,
    Idle(u64),
    Expired,
}

#[derive(Debug)]
pub struct WatchdogState {
    idle_ticks: AtomicU64,
    disabled: AtomicBool,
    busy: AtomicUsize,
}

impl WatchdogState {
    pub fn new(enabled: bool) -> Self {
        Self {
            idle_ticks: AtomicU64::new(0),
            disabled: AtomicBool::new(!enabled),
            busy: AtomicUsize::new(0),
        }
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    /// Toggle without touching the idle counter.
    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }

    /// Mark a privileged call in flight and reset the idle counter. The
    /// returned guard clears the busy mark when dropped.
    pub fn begin_work(&self) -> WorkGuard<'_> {
        self.busy.fetch_add(1, Ordering::SeqCst);
        self.idle_ticks.store(0, Ordering::SeqCst);
        WorkGuard { state: self }
    }

    pub fn tick(&self, policy: &WatchdogPolicy, locked: bool) -> TickOutcome {
        if !self.is_enabled() || self.is_busy() {
            return TickOutcome::Skipped;
        }
        let ticks = self.idle_ticks();
        let limit = if locked {
            policy.locked_timeout
        } else {
            policy.idle_timeout
        };
        if ticks > limit {
            return TickOutcome::Expired;
        }
        TickOutcome::Idle(self.idle_ticks.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct WorkGuard<'a> {
    state: &'a WatchdogState,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.state.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> WatchdogPolicy {
        WatchdogPolicy {
            idle_timeout: 3,
            locked_timeout: 5,
        }
    }

    #[test]
    fn test_expires_after_idle_timeout_when_unlocked() {
        let state = WatchdogState::new(true);
        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(state.tick(&policy(), false));
        }
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Idle(1),
                TickOutcome::Idle(2),
                TickOutcome::Idle(3),
                TickOutcome::Idle(4),
                TickOutcome::Expired,
            ]
        );
    }

    #[test]
    fn test_locked_uses_larger_threshold() {
        let state = WatchdogState::new(true);
        for _ in 0..6 {
            assert_ne!(state.tick(&policy(), true), TickOutcome::Expired);
        }
        assert_eq!(state.tick(&policy(), true), TickOutcome::Expired);
    }

    #[test]
    fn test_work_resets_and_suppresses() {
        let state = WatchdogState::new(true);
        state.tick(&policy(), false);
        state.tick(&policy(), false);
        {
            let _guard = state.begin_work();
            assert_eq!(state.idle_ticks(), 0);
            assert_eq!(state.tick(&policy(), false), TickOutcome::Skipped);
            assert_eq!(state.idle_ticks(), 0);
        }
        assert!(!state.is_busy());
        assert_eq!(state.tick(&policy(), false), TickOutcome::Idle(1));
    }

    #[test]
    fn test_disabled_never_expires_and_toggle_keeps_count() {
        let state = WatchdogState::new(true);
        state.tick(&policy(), false);
        state.tick(&policy(), false);
        state.set_enabled(false);
        for _ in 0..1000 {
            assert_eq!(state.tick(&policy(), false), TickOutcome::Skipped);
        }
        assert_eq!(state.idle_ticks(), 2);
        state.set_enabled(true);
        assert_eq!(state.tick(&policy(), false), TickOutcome::Idle(3));
    }
}
