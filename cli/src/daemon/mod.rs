// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Service wiring from configuration
//! - Optional health endpoint and Prometheus exporter
//! - Graceful shutdown

pub mod server;

pub use server::run_daemon;
