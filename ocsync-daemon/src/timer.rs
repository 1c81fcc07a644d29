//! Cancellable one-shot timers that feed the control loop.
//!
//! A fired timer does not call into the orchestrator; it sends
//! [`SyncEvent::TimerFired`] into the trigger channel and the control loop
//! decides what to do with it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::event::SyncEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Handle to one scheduled firing. Cancelling twice, or after it fired, does
/// nothing. Dropping the handle cancels it.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    delay: Duration,
    task: Option<AbortHandle>,
}

impl Timer {
    /// A timer with no backing task. Used by schedulers that deliver firings
    /// some other way.
    pub fn detached(id: TimerId, delay: Duration) -> Self {
        Self {
            id,
            delay,
            task: None,
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(timer = %self.id, "timer cancelled");
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Creates timers on behalf of the orchestrator.
pub trait TimerScheduler: Send {
    fn schedule(&mut self, id: TimerId, delay: Duration) -> Timer;
}

/// Timers backed by `tokio::time::sleep`. Must be used inside a runtime.
#[derive(Debug, Clone)]
pub struct TokioTimers {
    triggers: mpsc::UnboundedSender<SyncEvent>,
}

impl TokioTimers {
    pub fn new(triggers: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self { triggers }
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&mut self, id: TimerId, delay: Duration) -> Timer {
        let triggers = self.triggers.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if triggers.send(SyncEvent::TimerFired(id)).is_err() {
                tracing::debug!(timer = %id, "control loop gone; dropping timer firing");
            }
        });
        Timer {
            id,
            delay,
            task: Some(handle.abort_handle()),
        }
    }
}
