// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! `pkgbroker call`: one method call from the shell.
//!
//! The session lock dies with the connection, so `--lock` wraps the call in
//! `Lock`/`Unlock` on the same connection.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;

use pkgbroker_core::presentation::bus::{BusClient, BusError};

use super::resolve_socket;

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Method name, e.g. `GetPackages`
    pub method: String,

    /// Arguments; each is parsed as JSON, falling back to a plain string
    pub args: Vec<String>,

    /// Hold the session lock around the call
    #[arg(long)]
    pub lock: bool,

    /// Print signals received while the call ran
    #[arg(long)]
    pub signals: bool,
}

/// `"installed"`, `installed`, `true` and `[1,2]` all do what one expects.
pub fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn handle_command(args: CallArgs, config_path: Option<PathBuf>, socket: Option<PathBuf>) -> Result<()> {
    let socket = resolve_socket(config_path, socket)?;
    let mut client = BusClient::connect(&socket)
        .await
        .with_context(|| format!("Failed to connect to {}", socket.display()))?;

    if args.lock {
        let locked = client.call("Lock", Vec::new()).await.context("Lock failed")?;
        if locked != Value::Bool(true) {
            bail!("session is locked by another client");
        }
    }

    let params = args.args.iter().map(|a| parse_argument(a)).collect();
    let result = client.call(&args.method, params).await;

    if args.lock {
        if let Err(e) = client.call("Unlock", Vec::new()).await {
            eprintln!("{} {}", "Unlock failed:".yellow(), e);
        }
    }
    if args.signals {
        for signal in client.take_signals() {
            eprintln!("{} {}", signal.name.cyan(), signal.args);
        }
    }

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(BusError::Remote { name, message }) => {
            eprintln!("{} {}", name.red().bold(), message);
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Call failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_argument() {
        assert_eq!(parse_argument("\"installed\""), json!("installed"));
        assert_eq!(parse_argument("installed"), json!("installed"));
        assert_eq!(parse_argument("true"), json!(true));
        assert_eq!(parse_argument("[\"name\",\"size\"]"), json!(["name", "size"]));
        assert_eq!(parse_argument("foo,0,1.0,1,x86_64,repoA"), json!("foo,0,1.0,1,x86_64,repoA"));
    }
}
