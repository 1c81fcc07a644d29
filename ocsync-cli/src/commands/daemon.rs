//! `ocsync daemon` — foreground daemon and its lifecycle over the socket.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use ocsync_daemon::paths::socket_path;
use ocsync_daemon::{request_status, request_stop, start_blocking, DaemonError, DaemonOptions};

use super::home;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run daemon in foreground (watcher + timer + socket server).
    Start(DaemonStartArgs),
    /// Ask the daemon to stop once the running sync (if any) has finished.
    Stop,
    /// Query daemon runtime status over Unix socket.
    Status,
}

#[derive(Args, Debug)]
pub struct DaemonStartArgs {
    /// Debug logging; the synchronizer's output is shown instead of discarded.
    #[arg(long)]
    pub debug: bool,

    /// Emit log lines as JSON.
    #[arg(long)]
    pub json_logs: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;

    match command {
        DaemonCommand::Start(args) => {
            start_blocking(DaemonOptions {
                home,
                diagnostic: args.debug,
                json_logs: args.json_logs,
            })
            .context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(reply) => {
                if reply["waiting_for_run"].as_bool().unwrap_or(false) {
                    println!("daemon stop requested; it exits when the running sync finishes");
                } else {
                    println!("daemon stop requested");
                }
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
