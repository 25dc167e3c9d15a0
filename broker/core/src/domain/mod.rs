// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and contracts shared by the service, the bus and the engines

pub mod identity;
pub mod authorization;
pub mod package;
pub mod metadata;
pub mod backend;
pub mod events;
pub mod session;
pub mod watchdog;
pub mod trust;
pub mod config;
