//! Runs the external synchronizer off the control loop.
//!
//! Each run gets its own blocking worker. The worker only sees the
//! [`SyncInvocation`] snapshot taken at spawn time and reports back with a
//! single [`Completion`] message.

use std::fmt;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ocsync_core::SyncInvocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a run ended. Only `Exited { code: 0 }` counts as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Exited { code: i32 },
    /// Terminated by a signal; no exit code.
    Signaled,
    /// The child never started (missing program, bad permissions, missing
    /// local directory).
    SpawnFailed { reason: String },
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: 0 })
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Exited { code } => write!(f, "exit code {code}"),
            ProcessOutcome::Signaled => write!(f, "killed by signal"),
            ProcessOutcome::SpawnFailed { reason } => write!(f, "spawn failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub run: RunId,
    pub outcome: ProcessOutcome,
}

/// Starts a run without waiting for it.
pub trait Launcher: Send {
    fn launch(&mut self, run: RunId, invocation: SyncInvocation);
}

/// Production launcher: `spawn_blocking` + `std::process::Command`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    completions: mpsc::UnboundedSender<Completion>,
    diagnostic: bool,
}

impl ProcessRunner {
    /// With `diagnostic` set the child inherits stdout/stderr; otherwise both
    /// are discarded.
    pub fn new(completions: mpsc::UnboundedSender<Completion>, diagnostic: bool) -> Self {
        Self {
            completions,
            diagnostic,
        }
    }
}

impl Launcher for ProcessRunner {
    fn launch(&mut self, run: RunId, invocation: SyncInvocation) {
        let completions = self.completions.clone();
        let diagnostic = self.diagnostic;
        tokio::task::spawn_blocking(move || {
            let outcome = run_to_completion(&invocation, diagnostic);
            if completions.send(Completion { run, outcome }).is_err() {
                tracing::warn!(run = %run, "control loop gone; dropping completion");
            }
        });
    }
}

/// Run the synchronizer and block until it exits. No timeout is applied.
pub fn run_to_completion(invocation: &SyncInvocation, diagnostic: bool) -> ProcessOutcome {
    if !invocation.local_path().is_dir() {
        return ProcessOutcome::SpawnFailed {
            reason: format!("{} is not a directory", invocation.local_path().display()),
        };
    }

    let (stdout, stderr) = if diagnostic {
        (Stdio::inherit(), Stdio::inherit())
    } else {
        (Stdio::null(), Stdio::null())
    };

    let status = Command::new(invocation.program())
        .args(invocation.args())
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .status();

    match status {
        Ok(status) => match status.code() {
            Some(code) => ProcessOutcome::Exited { code },
            None => ProcessOutcome::Signaled,
        },
        Err(err) => ProcessOutcome::SpawnFailed {
            reason: format!("{}: {err}", invocation.program().display()),
        },
    }
}
