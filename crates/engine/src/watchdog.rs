//! Stalled-chain detection and recovery.

use tracing::{debug, info, warn};

use crate::error::RecalcError;
use crate::recalculator::{Recalculator, BATCH_HOOK, TASK_GROUP};

/// Result of one watchdog run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// No running job.
    Idle,
    /// A batch task is queued or executing; the chain is alive.
    InFlight,
    /// The chain had stalled; a batch was re-issued at `offset`.
    Recovered { offset: u64 },
}

impl Recalculator {
    /// Re-issue the next batch when the job is running but nothing is in flight.
    pub fn watchdog(&self) -> Result<WatchdogOutcome, RecalcError> {
        let state = match self.state.load()? {
            Some(stored) if stored.state.is_running() => stored.state,
            _ => {
                debug!("watchdog: no running job");
                return Ok(WatchdogOutcome::Idle);
            }
        };

        if self.scheduler.has_pending_or_running(BATCH_HOOK, TASK_GROUP)? {
            debug!(next_offset = state.next_offset, "watchdog: batch in flight");
            return Ok(WatchdogOutcome::InFlight);
        }

        let offset = state.next_offset;
        warn!(
            offset,
            processed = state.processed,
            total = state.total,
            "batch chain stalled; re-issuing batch"
        );
        let task_id = self.enqueue_batch(offset, state.batch_size)?;
        info!(offset, task_id = %task_id, "watchdog recovered stalled job");

        Ok(WatchdogOutcome::Recovered { offset })
    }
}
