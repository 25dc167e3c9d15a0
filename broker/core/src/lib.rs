// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! pkgbroker core
//!
//! Session and transaction orchestration for a privileged package daemon.
//!
//! # Architecture
//!
//! - **domain:** identities, package ids, the engine contract, lock/watchdog/trust state
//! - **application:** the service that guards, stages, builds and runs transactions
//! - **infrastructure:** event bus, authorization oracle, in-memory reference engine
//! - **presentation:** the Unix-socket bus and the health endpoint

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
