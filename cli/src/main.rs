// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! # pkgbroker
//!
//! One binary for both sides of the bus.
//!
//! ## Commands
//!
//! - `pkgbroker daemon [--notimeout]` - run the privileged service
//! - `pkgbroker monitor` - print every broadcast signal
//! - `pkgbroker call <METHOD> [ARGS]...` - one method call, reply on stdout
//! - `pkgbroker config show|validate` - configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use pkgbroker::commands::{self, CallArgs, ConfigCommand, DaemonArgs};

/// Privileged package-management broker
#[derive(Parser)]
#[command(name = "pkgbroker")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PKGBROKER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Bus socket (default: from configuration)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PKGBROKER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    #[command(name = "daemon")]
    Daemon(DaemonArgs),

    /// Print broadcast signals until interrupted
    #[command(name = "monitor")]
    Monitor,

    /// Perform one method call
    #[command(name = "call")]
    Call(CallArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Daemon(args)) => commands::daemon::handle_command(args, cli.config, cli.socket).await,
        Some(Commands::Monitor) => commands::monitor::handle_command(cli.config, cli.socket).await,
        Some(Commands::Call(args)) => commands::call::handle_command(args, cli.config, cli.socket).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}
