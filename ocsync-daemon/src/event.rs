//! Triggers that may warrant a resync.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ocsync_core::TRANSIENT_MARKER;

use crate::timer::TimerId;

/// The filesystem operations that re-trigger a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Deleted,
    Modified,
    MovedOut,
    MovedIn,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "creation"),
            ChangeKind::Deleted => write!(f, "deletion"),
            ChangeKind::Modified => write!(f, "modification"),
            ChangeKind::MovedOut => write!(f, "move out"),
            ChangeKind::MovedIn => write!(f, "move in"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    FilesystemChange { path: PathBuf, kind: ChangeKind },
    /// Carries the id of the timer that fired so cancelled timers can be told
    /// apart from the live one.
    TimerFired(TimerId),
    ForceRequested,
    InitialRun,
}

impl SyncEvent {
    /// Short label used in log fields.
    pub fn source(&self) -> &'static str {
        match self {
            SyncEvent::FilesystemChange { .. } => "watcher",
            SyncEvent::TimerFired(_) => "timer",
            SyncEvent::ForceRequested => "force",
            SyncEvent::InitialRun => "startup",
        }
    }

    /// Build a filesystem trigger, or `None` if `path` names the transient
    /// marker the synchronizer itself writes.
    pub fn filesystem(path: PathBuf, kind: ChangeKind) -> Option<Self> {
        if is_transient(&path) {
            return None;
        }
        Some(SyncEvent::FilesystemChange { path, kind })
    }
}

pub fn is_transient(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()) == Some(TRANSIENT_MARKER)
}
