// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! `pkgbroker monitor`: print every signal the daemon broadcasts.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use pkgbroker_core::presentation::bus::BusClient;

use super::resolve_socket;

pub async fn handle_command(config_path: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
    let socket = resolve_socket(config_path, socket)?;
    let mut client = BusClient::connect(&socket)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;
    eprintln!(
        "{} {} as {}",
        "Monitoring".bold(),
        socket.display(),
        client.unique_name().dimmed()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            signal = client.next_signal() => match signal.context("Bus read failed")? {
                Some(signal) => println!("{} {}", signal.name.cyan(), signal.args),
                None => {
                    eprintln!("{}", "Daemon closed the connection".yellow());
                    break;
                }
            },
        }
    }
    Ok(())
}
