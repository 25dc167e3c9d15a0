// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! `pkgbroker daemon`: load configuration and run the service in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

use pkgbroker_core::domain::config::DaemonConfig;

use crate::daemon::run_daemon;

#[derive(Args, Debug, Default)]
pub struct DaemonArgs {
    /// Start with the idle watchdog disabled
    #[arg(long)]
    pub notimeout: bool,
}

pub async fn handle_command(
    args: DaemonArgs,
    config_path: Option<PathBuf>,
    socket: Option<PathBuf>,
) -> Result<()> {
    let mut config = DaemonConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(socket) = socket {
        config.bus.socket_path = socket;
    }
    if args.notimeout {
        info!("Watchdog disabled by --notimeout");
        config.watchdog.enabled = false;
    }
    run_daemon(config).await
}
