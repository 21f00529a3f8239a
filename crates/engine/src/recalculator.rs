//! The recalculation service: lifecycle operations over the persisted job state.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use recalc_catalog::{CatalogSource, RelevanceEngine};
use recalc_core::{Clock, ExpectedRevision, JobState, SystemClock, TaskId};
use recalc_infra::config::{DEFAULT_BATCH_SIZE, DEFAULT_WATCHDOG_INTERVAL};
use recalc_infra::{StateStore, TaskScheduler};

use crate::error::RecalcError;

/// Hook name of batch tasks.
pub const BATCH_HOOK: &str = "relevance_recalc_batch";
/// Task group all batch tasks of the job belong to.
pub const TASK_GROUP: &str = "relevance_recalc";
/// Timer schedule name of the watchdog.
pub const WATCHDOG_SCHEDULE: &str = "relevance_recalc_watchdog";

/// Payload of a batch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub offset: u64,
    /// Zero (or absent) means the job's batch size.
    #[serde(default)]
    pub limit: u64,
}

impl BatchPayload {
    pub fn to_value(self) -> serde_json::Value {
        serde_json::json!({ "offset": self.offset, "limit": self.limit })
    }
}

/// State snapshot plus whole-number completion percentage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub state: JobState,
    pub percent: u8,
}

impl From<JobState> for Progress {
    fn from(state: JobState) -> Self {
        let percent = state.percent();
        Self { state, percent }
    }
}

/// Background relevance recalculation job.
///
/// Owns no in-memory progress: every operation reads the persisted record,
/// so any number of handles over one store observe the same job. Several
/// processes can share the Postgres store; the JSON file store checks
/// revisions within a single process only.
pub struct Recalculator {
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) scheduler: Arc<dyn TaskScheduler>,
    pub(crate) catalog: Arc<dyn CatalogSource>,
    pub(crate) relevance: Arc<dyn RelevanceEngine>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) batch_size: u64,
    pub(crate) watchdog_interval: Duration,
}

impl std::fmt::Debug for Recalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recalculator")
            .field("batch_size", &self.batch_size)
            .field("watchdog_interval", &self.watchdog_interval)
            .finish_non_exhaustive()
    }
}

impl Recalculator {
    pub fn new(
        state: Arc<dyn StateStore>,
        scheduler: Arc<dyn TaskScheduler>,
        catalog: Arc<dyn CatalogSource>,
        relevance: Arc<dyn RelevanceEngine>,
    ) -> Self {
        Self {
            state,
            scheduler,
            catalog,
            relevance,
            clock: Arc::new(SystemClock),
            batch_size: DEFAULT_BATCH_SIZE,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Items per batch for jobs started from now on. Zero is ignored.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn watchdog_interval(&self) -> Duration {
        self.watchdog_interval
    }

    /// Start a new job, discarding whatever state the previous one left.
    ///
    /// Fails with [`RecalcError::SchedulerUnavailable`] before touching any
    /// state when the task facility is down. Once the running state is
    /// persisted the job has started: a failure to queue the first batch is
    /// logged and left to the watchdog.
    pub fn start(&self) -> Result<JobState, RecalcError> {
        if !self.scheduler.is_available() {
            warn!("recalculation not started: task scheduler unavailable");
            return Err(RecalcError::SchedulerUnavailable);
        }

        let total = self.catalog.count_published()?;
        let state = JobState::started(total, self.batch_size, self.clock.now())?;
        self.state.store(ExpectedRevision::Any, &state)?;

        let cancelled = match self.scheduler.cancel_all(BATCH_HOOK, TASK_GROUP) {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(error = %e, "failed to cancel queued batches");
                0
            }
        };
        if let Err(e) = self.enqueue_batch(0, state.batch_size) {
            warn!(error = %e, "failed to enqueue first batch; the watchdog will re-issue it");
        }

        info!(total, batch_size = state.batch_size, cancelled, "relevance recalculation started");
        Ok(state)
    }

    /// Current job state; an idle snapshot when nothing is stored or the
    /// store cannot be read.
    pub fn get_state(&self) -> JobState {
        match self.state.load() {
            Ok(Some(stored)) => stored.state,
            Ok(None) => JobState::idle(self.batch_size),
            Err(e) => {
                warn!(error = %e, "failed to read job state; reporting idle");
                JobState::idle(self.batch_size)
            }
        }
    }

    pub fn progress(&self) -> Progress {
        self.get_state().into()
    }

    /// Abandon the current job and drop all computed scores.
    ///
    /// The state goes idle first so batches already in flight see a
    /// non-running job and do nothing.
    pub fn clear(&self) -> Result<JobState, RecalcError> {
        let idle = JobState::idle(self.batch_size);
        self.state.store(ExpectedRevision::Any, &idle)?;

        let cancelled = self.scheduler.cancel_all(BATCH_HOOK, TASK_GROUP)?;
        self.relevance.clear_all().map_err(RecalcError::Relevance)?;

        info!(cancelled, "relevance data cleared");
        Ok(idle)
    }

    /// Queue the batch at `offset` with the job's own batch size, which may
    /// differ from this handle's configured size after a restart.
    pub(crate) fn enqueue_batch(&self, offset: u64, limit: u64) -> Result<TaskId, RecalcError> {
        let payload = BatchPayload { offset, limit };
        Ok(self
            .scheduler
            .enqueue(BATCH_HOOK, payload.to_value(), TASK_GROUP)?)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use recalc_core::JobStatus;
    use recalc_infra::{
        InMemoryTaskStore, QueueScheduler, SchedulerError, TaskStatus, TaskStore, TaskStoreError,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pending_offsets(f: &Fixture) -> Vec<u64> {
        f.tasks
            .list_by_status(BATCH_HOOK, TASK_GROUP, Some(TaskStatus::Pending), 100)
            .unwrap()
            .into_iter()
            .map(|t| t.payload["offset"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn get_state_without_record_is_idle_and_does_not_write() {
        let f = fixture(10, 200);
        let state = f.recalc.get_state();
        assert_eq!(state.status, JobStatus::Idle);
        assert_eq!(state.batch_size, 200);
        assert!(f.state.load().unwrap().is_none());
    }

    #[test]
    fn start_snapshots_total_and_enqueues_first_batch() {
        let f = fixture(450, 200);
        let state = f.recalc.start().unwrap();

        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(state.total, 450);
        assert_eq!(state.processed, 0);
        assert_eq!(state.next_offset, 0);
        assert_eq!(state.started_at, Some(t0()));
        assert!(state.finished_at.is_none());
        assert_eq!(pending_offsets(&f), vec![0]);
        assert_eq!(f.recalc.get_state(), state);
    }

    #[test]
    fn start_without_scheduler_changes_nothing() {
        let f = fixture(10, 5);
        f.tasks.close();

        assert!(matches!(
            f.recalc.start(),
            Err(RecalcError::SchedulerUnavailable)
        ));
        assert!(f.state.load().unwrap().is_none());
    }

    /// Scheduler that reports itself available but rejects enqueues while
    /// `failing` is set.
    struct FlakyScheduler {
        inner: Arc<QueueScheduler<Arc<InMemoryTaskStore>>>,
        failing: AtomicBool,
    }

    impl TaskScheduler for FlakyScheduler {
        fn is_available(&self) -> bool {
            self.inner.is_available()
        }

        fn enqueue(
            &self,
            hook: &str,
            payload: serde_json::Value,
            group: &str,
        ) -> Result<TaskId, SchedulerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SchedulerError::Store(TaskStoreError::Storage(
                    "queue write failed".to_string(),
                )));
            }
            self.inner.enqueue(hook, payload, group)
        }

        fn has_pending_or_running(&self, hook: &str, group: &str) -> Result<bool, SchedulerError> {
            self.inner.has_pending_or_running(hook, group)
        }

        fn cancel_all(&self, hook: &str, group: &str) -> Result<usize, SchedulerError> {
            self.inner.cancel_all(hook, group)
        }
    }

    #[test]
    fn start_survives_failed_first_enqueue() {
        let f = fixture(30, 10);
        let flaky = Arc::new(FlakyScheduler {
            inner: f.scheduler.clone(),
            failing: AtomicBool::new(true),
        });
        let recalc = Recalculator::new(f.state.clone(), flaky.clone(), f.catalog.clone(), f.relevance.clone())
            .with_clock(f.clock.clone())
            .with_batch_size(10);

        let state = recalc.start().unwrap();
        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(recalc.get_state(), state);
        assert!(pending_offsets(&f).is_empty());

        flaky.failing.store(false, Ordering::SeqCst);
        assert_eq!(
            recalc.watchdog().unwrap(),
            crate::watchdog::WatchdogOutcome::Recovered { offset: 0 }
        );
        assert_eq!(pending_offsets(&f), vec![0]);
    }

    #[test]
    fn restart_resets_progress_and_replaces_pending_tasks() {
        let f = fixture(450, 200);
        f.recalc.start().unwrap();
        f.recalc.process_batch(0, None).unwrap();
        assert_eq!(f.recalc.get_state().processed, 200);

        f.catalog.upsert(recalc_catalog::CatalogItem::published(1000, [1]));
        let restarted = f.recalc.start().unwrap();

        assert_eq!(restarted.processed, 0);
        assert_eq!(restarted.total, 451);
        assert_eq!(pending_offsets(&f), vec![0]);
        // The original batch-0 task and the follow-up for offset 200.
        assert_eq!(f.tasks.stats().unwrap().cancelled, 2);
    }

    #[test]
    fn clear_goes_idle_cancels_and_drops_scores() {
        let f = fixture(10, 5);
        f.recalc.start().unwrap();
        f.recalc.process_batch(0, None).unwrap();
        assert!(!f.relevance.is_empty());

        let state = f.recalc.clear().unwrap();
        assert_eq!(state.status, JobStatus::Idle);
        assert!(f.relevance.is_empty());
        assert!(pending_offsets(&f).is_empty());
        assert_eq!(f.recalc.get_state().status, JobStatus::Idle);
    }

    #[test]
    fn progress_reports_percent() {
        let f = fixture(450, 200);
        f.recalc.start().unwrap();
        f.recalc.process_batch(0, None).unwrap();

        let progress = f.recalc.progress();
        assert_eq!(progress.percent, 44);
        assert_eq!(progress.state.processed, 200);
    }

    #[test]
    fn batch_payload_defaults_limit() {
        let payload: BatchPayload = serde_json::from_value(serde_json::json!({"offset": 400})).unwrap();
        assert_eq!(payload, BatchPayload { offset: 400, limit: 0 });
    }
}
