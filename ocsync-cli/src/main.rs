//! ocsync — background sync agent for an ownCloud folder.
//!
//! # Usage
//!
//! ```text
//! ocsync daemon start [--debug] [--json-logs]
//! ocsync daemon stop|status
//! ocsync sync [--keep-cadence]
//! ocsync status [--json] [--follow]
//! ocsync config show [--json] | init [--force] | set [--host ...] | path
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, daemon::DaemonCommand, status::StatusArgs, sync::SyncArgs};
use ocsync_core::Protocol;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ocsync",
    version,
    about = "Keep a local folder in sync with an ownCloud server",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Ask the running daemon to sync now.
    Sync(SyncArgs),

    /// Show the daemon's sync status.
    Status(StatusArgs),

    /// Inspect or change the saved configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared Protocol argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `Protocol` with a helpful message.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolArg(pub Protocol);

impl FromStr for ProtocolArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<Protocol>().map(Self).map_err(|_| {
            format!("unknown protocol '{s}'; expected: owncloud, ownclouds, smb, sftp")
        })
    }
}

impl fmt::Display for ProtocolArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ProtocolArg> for Protocol {
    fn from(p: ProtocolArg) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
