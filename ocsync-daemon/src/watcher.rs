//! Recursive watch over the local sync directory.
//!
//! The `notify` callback runs on the backend's own thread. It only translates
//! raw events into [`SyncEvent`]s and pushes them into the trigger channel;
//! it never touches orchestrator state.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::DaemonError;
use crate::event::{ChangeKind, SyncEvent};

/// The one directory tree currently being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
    root: PathBuf,
}

impl WatchHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub struct FilesystemWatcher {
    watcher: RecommendedWatcher,
    active: Option<WatchHandle>,
}

impl FilesystemWatcher {
    pub fn new(triggers: mpsc::UnboundedSender<SyncEvent>) -> Result<Self, DaemonError> {
        let watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                for trigger in sync_events_for(&event) {
                    if triggers.send(trigger).is_err() {
                        return;
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        })?;

        Ok(Self {
            watcher,
            active: None,
        })
    }

    pub fn active(&self) -> Option<&WatchHandle> {
        self.active.as_ref()
    }

    /// Point the watch at `root`. The previous handle is always removed
    /// first; if `root` is not a directory nothing is watched afterwards.
    pub fn rewatch(&mut self, root: &Path) -> Result<&WatchHandle, DaemonError> {
        self.unwatch();

        if !root.is_dir() {
            return Err(DaemonError::WatchSetupFailed {
                path: root.to_path_buf(),
            });
        }

        self.watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(path = %root.display(), "watching local directory");
        Ok(self.active.insert(WatchHandle {
            root: root.to_path_buf(),
        }))
    }

    pub fn unwatch(&mut self) {
        let Some(handle) = self.active.take() else {
            return;
        };
        match self.watcher.unwatch(&handle.root) {
            Ok(()) => tracing::info!(path = %handle.root.display(), "stopped watching"),
            // The root may already be gone; inotify drops the watch itself then.
            Err(err) => tracing::debug!(
                path = %handle.root.display(),
                error = %err,
                "unwatch failed",
            ),
        }
    }
}

/// Translate one raw `notify` event into zero or more triggers.
///
/// Access and metadata-only events are ignored, and so is anything naming
/// the synchronizer's transient marker file.
pub fn sync_events_for(event: &Event) -> Vec<SyncEvent> {
    let mut triggers = Vec::new();
    let mut push = |path: &PathBuf, kind: ChangeKind| {
        if let Some(trigger) = SyncEvent::filesystem(path.clone(), kind) {
            triggers.push(trigger);
        }
    };

    match event.kind {
        EventKind::Create(_) => event.paths.iter().for_each(|p| push(p, ChangeKind::Created)),
        EventKind::Remove(_) => event.paths.iter().for_each(|p| push(p, ChangeKind::Deleted)),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            event.paths.iter().for_each(|p| push(p, ChangeKind::Modified))
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.iter().for_each(|p| push(p, ChangeKind::MovedOut)),
            RenameMode::To => event.paths.iter().for_each(|p| push(p, ChangeKind::MovedIn)),
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    push(from, ChangeKind::MovedOut);
                    push(to, ChangeKind::MovedIn);
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    let kind = if path.exists() {
                        ChangeKind::MovedIn
                    } else {
                        ChangeKind::MovedOut
                    };
                    push(path, kind);
                }
            }
        },
        _ => {}
    }

    triggers
}
