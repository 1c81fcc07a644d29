pub mod config;
pub mod daemon;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};

use ocsync_core::SyncStatus;

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Colored label mirroring the tray icon for each status.
pub fn status_label(status: SyncStatus) -> ColoredString {
    match status {
        SyncStatus::Idle => "● idle".green().bold(),
        SyncStatus::Syncing => "⟳ syncing".cyan().bold(),
        SyncStatus::Error => "✗ error".red().bold(),
    }
}

pub const NOT_RUNNING_HINT: &str = "daemon is not running; start it with `ocsync daemon start`";
