//! Batch processing: fetch one offset/limit slice, recompute it, fold the
//! progress into the job state and chain the next batch.
//!
//! Batch tasks arrive at-least-once and possibly concurrently. A batch only
//! does work when the job is running and its offset is the one the state
//! expects next; its state write is a compare-and-swap against the revision
//! it read, so a batch that lost a race commits nothing and chains nothing.

use tracing::{debug, info, instrument, warn};

use recalc_core::{Advance, ExpectedRevision, JobState};
use recalc_infra::{StateStoreError, Task};

use crate::error::RecalcError;
use crate::recalculator::{BatchPayload, Recalculator};

/// Why a batch did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No job state has ever been stored.
    NoJob,
    /// The job is idle or completed.
    NotRunning,
    /// The offset was already folded (or is not yet due).
    OffsetMismatch { expected: u64 },
}

/// Result of one `process_batch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing done; the state was untouched.
    Stale(StaleReason),
    /// Progress committed and the next batch enqueued.
    Advanced { processed: u64, next_offset: u64 },
    /// Progress committed and the job completed.
    Finished { processed: u64 },
    /// Another writer moved the state first; this batch's result was dropped.
    Superseded,
}

impl Recalculator {
    /// Process the batch at `offset`. A `None` or zero `limit` means the
    /// job's batch size.
    #[instrument(skip(self))]
    pub fn process_batch(&self, offset: u64, limit: Option<u64>) -> Result<BatchOutcome, RecalcError> {
        let Some(stored) = self.state.load()? else {
            debug!("no job state; batch ignored");
            return Ok(BatchOutcome::Stale(StaleReason::NoJob));
        };
        let revision = stored.revision;
        let mut state = stored.state;

        if !state.is_running() {
            debug!(status = %state.status, "job not running; batch ignored");
            return Ok(BatchOutcome::Stale(StaleReason::NotRunning));
        }
        if offset != state.next_offset {
            debug!(expected = state.next_offset, "stale batch offset; ignored");
            return Ok(BatchOutcome::Stale(StaleReason::OffsetMismatch {
                expected: state.next_offset,
            }));
        }

        let limit = state.effective_limit(limit);

        let ids = match self.catalog.list_published_ids(offset, limit) {
            Ok(ids) => ids,
            Err(e) => return Err(self.fail_batch(revision, &mut state, e.into())),
        };

        let now = self.clock.now();
        if ids.is_empty() {
            // Catalog exhausted before `processed` reached the snapshot.
            state.finish(now);
            return self.commit_finish(revision, &state);
        }

        for &item in &ids {
            let categories = match self.catalog.categories_of(item) {
                Ok(categories) => categories,
                Err(e) => return Err(self.fail_batch(revision, &mut state, e.into())),
            };
            if categories.is_empty() {
                continue;
            }
            if let Err(source) = self.relevance.recompute(item, &categories) {
                let err = RecalcError::Recompute { item, source };
                return Err(self.fail_batch(revision, &mut state, err));
            }
        }

        match state.advance(offset, limit, ids.len() as u64, now)? {
            Advance::Finished => self.commit_finish(revision, &state),
            Advance::Continue { next_offset } => {
                if !self.commit(revision, &state)? {
                    return Ok(BatchOutcome::Superseded);
                }

                if let Err(e) = self.enqueue_batch(next_offset, state.batch_size) {
                    // The watchdog re-issues the batch at the persisted offset.
                    warn!(next_offset, error = %e, "failed to enqueue next batch");
                } else {
                    debug!(processed = state.processed, total = state.total, next_offset, "batch committed");
                }

                Ok(BatchOutcome::Advanced {
                    processed: state.processed,
                    next_offset,
                })
            }
        }
    }

    /// Run the batch described by a task's payload.
    pub fn handle_task(&self, task: &Task) -> Result<BatchOutcome, RecalcError> {
        let payload: BatchPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| RecalcError::InvalidPayload(e.to_string()))?;
        self.process_batch(payload.offset, Some(payload.limit))
    }

    fn commit_finish(&self, revision: u64, state: &JobState) -> Result<BatchOutcome, RecalcError> {
        if !self.commit(revision, state)? {
            return Ok(BatchOutcome::Superseded);
        }

        info!(processed = state.processed, total = state.total, "relevance recalculation completed");
        Ok(BatchOutcome::Finished {
            processed: state.processed,
        })
    }

    /// Compare-and-swap the state. `Ok(false)` means another writer won.
    fn commit(&self, revision: u64, state: &JobState) -> Result<bool, RecalcError> {
        match self.state.store(ExpectedRevision::Exact(revision), state) {
            Ok(_) => Ok(true),
            Err(StateStoreError::Conflict { actual, .. }) => {
                warn!(read_revision = revision, actual, "job state moved during batch; result dropped");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Note the failure on the state without moving progress, then hand the
    /// error back so the task is retried.
    fn fail_batch(&self, revision: u64, state: &mut JobState, err: RecalcError) -> RecalcError {
        warn!(offset = state.next_offset, error = %err, "batch failed");

        state.record_error(err.to_string(), self.clock.now());
        match self.state.store(ExpectedRevision::Exact(revision), state) {
            Ok(_) => {}
            Err(StateStoreError::Conflict { .. }) => {
                debug!("job state moved; failure note dropped");
            }
            Err(e) => warn!(error = %e, "failed to record batch error"),
        }
        err
    }
}
