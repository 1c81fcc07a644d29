//! `ocsync sync` — trigger a run on the daemon.

use anyhow::{bail, Context, Result};
use clap::Args;

use ocsync_daemon::{request_sync, DaemonError, SyncDecision};

use super::{home, NOT_RUNNING_HINT};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Leave the periodic timer alone instead of restarting it from now.
    #[arg(long)]
    pub keep_cadence: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;

        let reply = match request_sync(&home, !self.keep_cadence) {
            Ok(reply) => reply,
            Err(DaemonError::DaemonNotRunning { .. }) => bail!(NOT_RUNNING_HINT),
            Err(err) => return Err(err).context("failed to request sync"),
        };
        let decision: SyncDecision =
            serde_json::from_value(reply).context("unexpected sync reply from daemon")?;

        match decision {
            SyncDecision::Spawned(run) => println!("✓ sync {run} started"),
            SyncDecision::Coalesced => {
                println!("✓ a sync is already running; another one follows it")
            }
            SyncDecision::Suppressed => println!("daemon is stopping; no sync started"),
            SyncDecision::Ignored => println!("nothing to do"),
        }
        Ok(())
    }
}
