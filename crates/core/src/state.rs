//! The persisted job-state record and its pure transitions.
//!
//! Exactly one `JobState` exists at a time. It is created (overwritten) when a
//! run starts, advanced once per folded batch, and finalised when the catalog
//! is exhausted or `processed` reaches the `total` snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Lifecycle phase of the recalculation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No job has run, or the last one was abandoned by a data clear.
    Idle,
    /// Batches are in flight.
    Running,
    /// Terminal until the next start.
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat job-state record, persisted wholesale under one well-known key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub status: JobStatus,
    /// Published item count snapshotted at start.
    pub total: u64,
    /// Cumulative items folded into state; never exceeds `total`.
    pub processed: u64,
    /// Items per batch, fixed for the job's duration.
    pub batch_size: u64,
    /// Offset of the next batch to run.
    pub next_offset: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last failure note, empty when the last batch succeeded.
    #[serde(default)]
    pub last_error: String,
}

/// Outcome of folding one batch into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// More batches remain; the next one starts at `next_offset`.
    Continue { next_offset: u64 },
    /// `processed` reached `total`; the state is now completed.
    Finished,
}

impl JobState {
    /// Snapshot reported when nothing has been persisted yet.
    pub fn idle(batch_size: u64) -> Self {
        Self {
            status: JobStatus::Idle,
            total: 0,
            processed: 0,
            batch_size,
            next_offset: 0,
            started_at: None,
            updated_at: None,
            finished_at: None,
            last_error: String::new(),
        }
    }

    /// Fresh running state for a new job.
    pub fn started(total: u64, batch_size: u64, now: DateTime<Utc>) -> DomainResult<Self> {
        if batch_size == 0 {
            return Err(DomainError::validation("batch_size must be greater than zero"));
        }

        Ok(Self {
            status: JobStatus::Running,
            total,
            processed: 0,
            batch_size,
            next_offset: 0,
            started_at: Some(now),
            updated_at: Some(now),
            finished_at: None,
            last_error: String::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Resolve a caller-supplied limit; `None` or zero means the job's batch size.
    pub fn effective_limit(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(limit) if limit > 0 => limit,
            _ => self.batch_size,
        }
    }

    /// Fold a fetched batch of `fetched` items read at `offset..offset + limit`.
    ///
    /// `processed` is clamped to `total` so an undercounted snapshot can never
    /// push progress past 100%.
    pub fn advance(
        &mut self,
        offset: u64,
        limit: u64,
        fetched: u64,
        now: DateTime<Utc>,
    ) -> DomainResult<Advance> {
        if !self.is_running() {
            return Err(DomainError::invariant(format!(
                "cannot advance a {} job",
                self.status
            )));
        }

        let next_offset = offset.saturating_add(limit);
        if next_offset < self.next_offset {
            return Err(DomainError::invariant(format!(
                "next_offset would move backwards ({} -> {})",
                self.next_offset, next_offset
            )));
        }

        self.processed = self.processed.saturating_add(fetched).min(self.total);
        self.next_offset = next_offset;
        self.updated_at = Some(now);
        self.last_error.clear();

        if self.processed >= self.total {
            self.finish(now);
            return Ok(Advance::Finished);
        }

        Ok(Advance::Continue { next_offset })
    }

    /// Mark the job completed.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = Some(now);
        self.finished_at = Some(now);
    }

    /// Note a failed batch without moving any progress counters.
    pub fn record_error(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.last_error = error.into();
        self.updated_at = Some(now);
    }

    /// Whole-number completion percentage for progress displays.
    pub fn percent(&self) -> u8 {
        match self.status {
            JobStatus::Completed => 100,
            JobStatus::Idle => 0,
            JobStatus::Running if self.total == 0 => 0,
            JobStatus::Running => ((self.processed.min(self.total) * 100) / self.total) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn idle_snapshot_has_no_progress() {
        let state = JobState::idle(200);
        assert_eq!(state.status, JobStatus::Idle);
        assert_eq!(state.processed, 0);
        assert!(state.finished_at.is_none());
        assert_eq!(state.percent(), 0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            JobState::started(10, 0, t0()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn sequential_batches_terminate_at_total() {
        let mut state = JobState::started(450, 200, t0()).unwrap();

        let a = state.advance(0, 200, 200, t0() + Duration::seconds(1)).unwrap();
        assert_eq!(a, Advance::Continue { next_offset: 200 });
        assert_eq!(state.processed, 200);

        let b = state.advance(200, 200, 200, t0() + Duration::seconds(2)).unwrap();
        assert_eq!(b, Advance::Continue { next_offset: 400 });
        assert_eq!(state.processed, 400);

        let c = state.advance(400, 200, 50, t0() + Duration::seconds(3)).unwrap();
        assert_eq!(c, Advance::Finished);
        assert_eq!(state.processed, 450);
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!(state.finished_at, Some(t0() + Duration::seconds(3)));
        assert_eq!(state.percent(), 100);
    }

    #[test]
    fn undercounted_total_clamps_processed() {
        let mut state = JobState::started(100, 200, t0()).unwrap();
        let outcome = state.advance(0, 200, 150, t0()).unwrap();
        assert_eq!(outcome, Advance::Finished);
        assert_eq!(state.processed, 100);
    }

    #[test]
    fn advancing_a_completed_job_is_an_invariant_violation() {
        let mut state = JobState::started(10, 5, t0()).unwrap();
        state.finish(t0());
        assert!(matches!(
            state.advance(0, 5, 5, t0()),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn offset_cannot_move_backwards() {
        let mut state = JobState::started(1000, 100, t0()).unwrap();
        state.advance(0, 100, 100, t0()).unwrap();
        state.advance(100, 100, 100, t0()).unwrap();
        assert!(state.advance(0, 100, 100, t0()).is_err());
        assert_eq!(state.next_offset, 200);
    }

    #[test]
    fn zero_or_missing_limit_falls_back_to_batch_size() {
        let state = JobState::idle(200);
        assert_eq!(state.effective_limit(None), 200);
        assert_eq!(state.effective_limit(Some(0)), 200);
        assert_eq!(state.effective_limit(Some(25)), 25);
    }

    #[test]
    fn percent_rounds_down() {
        let mut state = JobState::started(3, 1, t0()).unwrap();
        state.advance(0, 1, 1, t0()).unwrap();
        assert_eq!(state.percent(), 33);
    }

    #[test]
    fn serializes_status_as_lowercase() {
        let state = JobState::started(5, 2, t0()).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["last_error"], "");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: while running, `processed` never decreases and never exceeds `total`.
        #[test]
        fn processed_is_monotonic_and_bounded(
            total in 0u64..5_000,
            batch_size in 1u64..500,
            fetched in prop::collection::vec(0u64..600, 1..40)
        ) {
            let mut state = JobState::started(total, batch_size, t0()).unwrap();
            let mut last_processed = 0;
            let mut last_offset = 0;

            for count in fetched {
                if !state.is_running() {
                    break;
                }
                let offset = state.next_offset;
                state.advance(offset, batch_size, count, t0()).unwrap();

                prop_assert!(state.processed <= state.total);
                prop_assert!(state.processed >= last_processed);
                prop_assert!(state.next_offset >= last_offset);
                last_processed = state.processed;
                last_offset = state.next_offset;
            }

            if state.status == JobStatus::Completed {
                prop_assert!(state.finished_at.is_some());
                prop_assert_eq!(state.processed, state.total);
            }
        }
    }
}
