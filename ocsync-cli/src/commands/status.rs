//! `ocsync status` — what the daemon is doing right now.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use ocsync_core::SyncStatus;
use ocsync_daemon::{follow_status, request_status, DaemonError, StatusSnapshot};

use super::{home, status_label, NOT_RUNNING_HINT};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long, conflicts_with = "follow")]
    pub json: bool,

    /// Keep printing every status change until interrupted.
    #[arg(long)]
    pub follow: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;

        if self.follow {
            return follow(&home);
        }

        let snapshot = match request_status(&home) {
            Ok(snapshot) => snapshot,
            Err(DaemonError::DaemonNotRunning { .. }) if self.json => {
                println!("{}", serde_json::json!({ "running": false }));
                return Ok(());
            }
            Err(DaemonError::DaemonNotRunning { .. }) => bail!(NOT_RUNNING_HINT),
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&snapshot);
        }
        Ok(())
    }
}

fn follow(home: &Path) -> Result<()> {
    let result = follow_status(home, |status| {
        let now = Local::now().format("%H:%M:%S").to_string();
        println!("{}  {}", now.bright_black(), status_label(status));
        true
    });
    match result {
        Ok(()) => {
            println!("daemon closed the status stream");
            Ok(())
        }
        Err(DaemonError::DaemonNotRunning { .. }) => bail!(NOT_RUNNING_HINT),
        Err(err) => Err(err).context("status stream failed"),
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "field")]
    field: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn print_table(snapshot: &StatusSnapshot) {
    println!(
        "ocsync v{} | {} | {} runs since {}",
        env!("CARGO_PKG_VERSION"),
        status_label(snapshot.status),
        snapshot.runs_started,
        format_time(snapshot.started_at),
    );

    let rows = vec![
        StatusRow {
            field: "local folder",
            value: snapshot.local_path.display().to_string(),
        },
        StatusRow {
            field: "watching",
            value: match &snapshot.watching {
                Some(root) => root.display().to_string(),
                None => "no (folder missing?)".to_string(),
            },
        },
        StatusRow {
            field: "last result",
            value: match &snapshot.last_outcome {
                Some(outcome) => outcome.to_string(),
                None => "none yet".to_string(),
            },
        },
        StatusRow {
            field: "last finished",
            value: snapshot
                .last_completed_at
                .map(format_time)
                .unwrap_or_else(|| "never".to_string()),
        },
        StatusRow {
            field: "rerun queued",
            value: yes_no(snapshot.submit_again),
        },
        StatusRow {
            field: "timer armed",
            value: yes_no(snapshot.timer_armed),
        },
        StatusRow {
            field: "stopping",
            value: yes_no(snapshot.force_stop),
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if snapshot.status == SyncStatus::Error {
        println!("Run 'ocsync daemon start --debug' to see the synchronizer's output.");
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn yes_no(flag: bool) -> String {
    let word = if flag { "yes" } else { "no" };
    word.to_string()
}
