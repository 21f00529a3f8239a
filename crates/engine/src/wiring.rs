//! Registration of the batch handler and the watchdog schedule.

use std::sync::Arc;

use tracing::{debug, warn};

use recalc_infra::{PeriodicTimer, TaskExecutor, TaskResult, TaskStore, TimerError};

use crate::batch::BatchOutcome;
use crate::recalculator::{Recalculator, BATCH_HOOK, WATCHDOG_SCHEDULE};

impl Recalculator {
    /// Register the batch handler on `executor` and the watchdog on `timer`
    /// (every `watchdog_interval`).
    pub fn install<S: TaskStore>(
        self: &Arc<Self>,
        executor: &mut TaskExecutor<S>,
        timer: &PeriodicTimer,
    ) -> Result<(), TimerError> {
        let recalc = Arc::clone(self);
        executor.register_handler(BATCH_HOOK, move |task| match recalc.handle_task(task) {
            Ok(BatchOutcome::Stale(reason)) => {
                debug!(task_id = %task.id, ?reason, "stale batch task skipped");
                TaskResult::Success
            }
            Ok(_) => TaskResult::Success,
            Err(e) => TaskResult::Failure(e.to_string()),
        });

        let recalc = Arc::clone(self);
        timer.register(WATCHDOG_SCHEDULE, self.watchdog_interval, move || {
            if let Err(e) = recalc.watchdog() {
                warn!(error = %e, "watchdog run failed");
            }
        })
    }
}
