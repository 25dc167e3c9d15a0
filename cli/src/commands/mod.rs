// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the pkgbroker CLI

pub mod call;
pub mod config;
pub mod daemon;
pub mod monitor;

pub use self::call::CallArgs;
pub use self::config::ConfigCommand;
pub use self::daemon::DaemonArgs;

use anyhow::{Context, Result};
use std::path::PathBuf;

use pkgbroker_core::domain::config::DaemonConfig;

/// `--socket` when given, otherwise the configured bus socket.
pub fn resolve_socket(config_path: Option<PathBuf>, socket: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(socket) = socket {
        return Ok(socket);
    }
    let config = DaemonConfig::load_or_default(config_path).context("Failed to load configuration")?;
    Ok(config.bus.socket_path)
}
