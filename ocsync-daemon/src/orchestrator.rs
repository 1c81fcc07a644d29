//! The sync state machine.
//!
//! ```text
//!            request_sync                 completion
//!   Idle ───────────────────▶ Syncing ─────────────────┬──▶ Idle + timer armed
//!    ▲                          │  ▲                    ├──▶ Syncing (submit_again: rerun now)
//!    │                          │  │ trigger while      └──▶ terminated (force_stop)
//!    │                          └──┘ syncing: submit_again = true
//! ```
//!
//! Every method here runs on the control loop, so the Idle/Syncing check that
//! prevents a second concurrent spawn needs no lock. Side effects go through
//! the [`Launcher`] and [`TimerScheduler`] seams.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use ocsync_core::{Configuration, SyncStatus};

use crate::event::SyncEvent;
use crate::process::{Completion, Launcher, ProcessOutcome, RunId};
use crate::timer::{Timer, TimerId, TimerScheduler};

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OrchestratorState {
    pub phase: Phase,
    /// A trigger arrived while syncing; rerun once the current run ends.
    pub submit_again: bool,
    /// Shutdown requested; observed at the next completion.
    pub force_stop: bool,
}

/// What a trigger turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "run", rename_all = "snake_case")]
pub enum SyncDecision {
    Spawned(RunId),
    /// Folded into the run already in flight.
    Coalesced,
    /// Stop has been requested; nothing new starts.
    Suppressed,
    /// A firing from a timer that is no longer live.
    Ignored,
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDecision::Spawned(run) => write!(f, "started run {run}"),
            SyncDecision::Coalesced => write!(f, "scheduled after the running sync"),
            SyncDecision::Suppressed => write!(f, "suppressed (stop requested)"),
            SyncDecision::Ignored => write!(f, "ignored"),
        }
    }
}

/// What happened after a run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    Rerun(RunId),
    Rearmed(TimerId),
    Terminated,
    /// The completion did not belong to the run in flight.
    Ignored,
}

pub struct SyncOrchestrator<L, T> {
    state: OrchestratorState,
    config: Configuration,
    launcher: L,
    timers: T,
    in_flight: Option<RunId>,
    timer: Option<Timer>,
    next_run: u64,
    next_timer: u64,
    status: SyncStatus,
    status_tx: broadcast::Sender<SyncStatus>,
    runs_started: u64,
    last_outcome: Option<ProcessOutcome>,
    last_completed_at: Option<DateTime<Utc>>,
}

impl<L: Launcher, T: TimerScheduler> SyncOrchestrator<L, T> {
    pub fn new(config: Configuration, launcher: L, timers: T) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            state: OrchestratorState::default(),
            config,
            launcher,
            timers,
            in_flight: None,
            timer: None,
            next_run: 0,
            next_timer: 0,
            status: SyncStatus::Idle,
            status_tx,
            runs_started: 0,
            last_outcome: None,
            last_completed_at: None,
        }
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Single entry point for every trigger source.
    pub fn handle_event(&mut self, event: SyncEvent) -> SyncDecision {
        match event {
            SyncEvent::FilesystemChange { path, kind } => {
                tracing::info!(path = %path.display(), "sync triggered by {kind}");
                self.request_sync()
            }
            SyncEvent::TimerFired(id) => self.on_timer_fired(id),
            SyncEvent::ForceRequested => self.force_sync(),
            SyncEvent::InitialRun => {
                tracing::info!("initial sync on startup");
                self.request_sync()
            }
        }
    }

    /// Start a run if idle, otherwise remember to run once more afterwards.
    pub fn request_sync(&mut self) -> SyncDecision {
        if self.state.force_stop {
            tracing::debug!("stop requested; ignoring sync trigger");
            return SyncDecision::Suppressed;
        }

        match self.state.phase {
            Phase::Syncing => {
                self.state.submit_again = true;
                tracing::info!(exe = %self.config.exe.display(), "scheduled rerun after current sync");
                SyncDecision::Coalesced
            }
            Phase::Idle => {
                self.state.submit_again = false;
                self.state.phase = Phase::Syncing;

                let run = RunId(self.next_run);
                self.next_run += 1;
                let invocation = self.config.invocation();
                tracing::info!(run = %run, command = %invocation, "started synchronizer");

                self.in_flight = Some(run);
                self.runs_started += 1;
                self.launcher.launch(run, invocation);
                self.emit(SyncStatus::Syncing);
                SyncDecision::Spawned(run)
            }
        }
    }

    /// Cancel the cadence, sync now, and restart the cadence from here.
    pub fn force_sync(&mut self) -> SyncDecision {
        if self.state.force_stop {
            tracing::debug!("stop requested; ignoring forced sync");
            return SyncDecision::Suppressed;
        }
        tracing::info!("forced sync requested");
        self.cancel_timer();
        let decision = self.request_sync();
        self.arm_timer();
        decision
    }

    pub fn on_timer_fired(&mut self, id: TimerId) -> SyncDecision {
        match &self.timer {
            Some(timer) if timer.id() == id => {
                self.timer = None;
                tracing::debug!(timer = %id, "periodic sync due");
                self.request_sync()
            }
            _ => {
                tracing::debug!(timer = %id, "ignoring firing from a cancelled timer");
                SyncDecision::Ignored
            }
        }
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    pub fn on_process_complete(&mut self, completion: Completion) -> CompletionAction {
        let Completion { run, outcome } = completion;
        if self.in_flight != Some(run) {
            tracing::warn!(run = %run, "completion for a run that is not in flight");
            return CompletionAction::Ignored;
        }
        self.in_flight = None;

        let status = if outcome.is_success() {
            tracing::info!(run = %run, exe = %self.config.exe.display(), "synchronizer finished: {outcome}");
            SyncStatus::Idle
        } else {
            tracing::warn!(run = %run, exe = %self.config.exe.display(), "synchronizer failed: {outcome}");
            SyncStatus::Error
        };
        self.last_outcome = Some(outcome);
        self.last_completed_at = Some(Utc::now());
        self.emit(status);

        self.state.phase = Phase::Idle;

        if self.state.force_stop {
            self.cancel_timer();
            tracing::info!("stop requested; not rearming");
            return CompletionAction::Terminated;
        }

        if self.state.submit_again {
            match self.request_sync() {
                SyncDecision::Spawned(next) => CompletionAction::Rerun(next),
                _ => CompletionAction::Ignored,
            }
        } else {
            CompletionAction::Rearmed(self.arm_timer())
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Ask the engine to stop. A run in flight is left to finish; nothing is
    /// rearmed once it does.
    pub fn request_stop(&mut self) {
        self.state.force_stop = true;
        match self.in_flight {
            Some(run) => tracing::info!(run = %run, "stop requested; waiting for running sync"),
            None => {
                self.cancel_timer();
                tracing::info!("stop requested");
            }
        }
    }

    /// Replace the configuration wholesale, restart the cadence with the new
    /// timeout, and sync.
    pub fn reconfigure(&mut self, config: Configuration) -> SyncDecision {
        tracing::info!(
            local_path = %config.local_path.display(),
            timeout_secs = config.timeout.as_secs(),
            "configuration replaced",
        );
        self.config = config;
        if self.state.force_stop {
            return SyncDecision::Suppressed;
        }
        self.arm_timer();
        self.request_sync()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.force_stop && self.in_flight.is_none()
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn in_flight(&self) -> Option<RunId> {
        self.in_flight
    }

    pub fn live_timer(&self) -> Option<&Timer> {
        self.timer.as_ref()
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started
    }

    pub fn last_outcome(&self) -> Option<&ProcessOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        self.last_completed_at
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Install a fresh timer for the configured timeout, replacing any live one.
    fn arm_timer(&mut self) -> TimerId {
        self.cancel_timer();
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let delay = self.config.timeout;
        self.timer = Some(self.timers.schedule(id, delay));
        tracing::debug!(timer = %id, delay_secs = delay.as_secs(), "next periodic sync armed");
        id
    }

    fn cancel_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }

    fn emit(&mut self, status: SyncStatus) {
        self.status = status;
        // No subscribers is fine.
        let _ = self.status_tx.send(status);
    }
}
