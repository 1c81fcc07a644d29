//! ocsync daemon runtime: orchestrator + watcher + process runner + socket server.

mod error;
pub mod event;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod protocol;
mod runtime;
pub mod timer;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use error::DaemonError;
pub use event::{ChangeKind, SyncEvent};
pub use orchestrator::{CompletionAction, OrchestratorState, Phase, SyncDecision, SyncOrchestrator};
pub use process::{Completion, Launcher, ProcessOutcome, ProcessRunner, RunId};
pub use protocol::{
    follow_status, request_configure, request_status, request_stop, request_sync, send_request,
    DaemonRequest, DaemonResponse, StatusSnapshot, StatusUpdate,
};
pub use runtime::{run, start_blocking, DaemonOptions};
pub use timer::{Timer, TimerId, TimerScheduler, TokioTimers};
pub use watcher::{FilesystemWatcher, WatchHandle};
