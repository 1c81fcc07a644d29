//! Test doubles shared by the unit test modules.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ocsync_core::SyncInvocation;

use crate::process::{run_to_completion, Launcher, ProcessOutcome, RunId};
use crate::timer::{Timer, TimerId, TimerScheduler};

/// Records launches instead of starting processes.
#[derive(Debug, Default)]
pub(crate) struct RecordingLauncher {
    pub launched: Vec<(RunId, SyncInvocation)>,
}

impl RecordingLauncher {
    pub fn runs(&self) -> Vec<RunId> {
        self.launched.iter().map(|(run, _)| *run).collect()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&mut self, run: RunId, invocation: SyncInvocation) {
        self.launched.push((run, invocation));
    }
}

/// Records scheduling requests; firings are delivered by the test calling
/// `on_timer_fired` directly.
#[derive(Debug, Default)]
pub(crate) struct ManualTimers {
    pub scheduled: Vec<(TimerId, Duration)>,
}

impl TimerScheduler for ManualTimers {
    fn schedule(&mut self, id: TimerId, delay: Duration) -> Timer {
        self.scheduled.push((id, delay));
        Timer::detached(id, delay)
    }
}

/// Write an executable `/bin/sh` script into `dir`.
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// `run_to_completion` that retries while a freshly written script is still
/// held open by a concurrently forked test thread (ETXTBSY).
#[cfg(unix)]
pub(crate) fn run_script(invocation: &SyncInvocation) -> ProcessOutcome {
    let mut outcome = run_to_completion(invocation, false);
    for _ in 0..20 {
        match &outcome {
            ProcessOutcome::SpawnFailed { reason } if reason.contains("busy") => {
                std::thread::sleep(Duration::from_millis(50));
                outcome = run_to_completion(invocation, false);
            }
            _ => break,
        }
    }
    outcome
}
