//! Scheduling adapter: the contract the recalculation engine uses to enqueue,
//! query and cancel its batch tasks.

use tracing::debug;

use recalc_core::TaskId;

use super::store::{TaskStore, TaskStoreError};
use super::types::{RetryPolicy, Task, TaskStatus};

/// Task-execution facility as seen by job owners.
pub trait TaskScheduler: Send + Sync {
    /// Whether tasks can currently be enqueued.
    fn is_available(&self) -> bool;

    fn enqueue(
        &self,
        hook: &str,
        payload: serde_json::Value,
        group: &str,
    ) -> Result<TaskId, SchedulerError>;

    /// At least one task of this hook/group is queued, waiting for a retry, or executing.
    fn has_pending_or_running(&self, hook: &str, group: &str) -> Result<bool, SchedulerError>;

    /// Cancel every queued task of this hook/group; returns how many were cancelled.
    fn cancel_all(&self, hook: &str, group: &str) -> Result<usize, SchedulerError>;
}

/// Scheduling adapter error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    #[error("task scheduler unavailable")]
    Unavailable,
    #[error("task store error: {0}")]
    Store(TaskStoreError),
}

impl From<TaskStoreError> for SchedulerError {
    fn from(err: TaskStoreError) -> Self {
        match err {
            TaskStoreError::Closed => SchedulerError::Unavailable,
            other => SchedulerError::Store(other),
        }
    }
}

/// [`TaskScheduler`] backed by a [`TaskStore`] drained by a `TaskExecutor`.
#[derive(Debug, Clone)]
pub struct QueueScheduler<S: TaskStore> {
    store: S,
    retry_policy: RetryPolicy,
}

impl<S: TaskStore> QueueScheduler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Retry policy attached to every enqueued task.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Queued or retry-waiting tasks of a hook/group.
    pub fn has_scheduled(&self, hook: &str, group: &str) -> Result<bool, SchedulerError> {
        let pending = self
            .store
            .list_by_status(hook, group, Some(TaskStatus::Pending), 1)?;
        if !pending.is_empty() {
            return Ok(true);
        }

        let retrying = self.store.list_by_status(
            hook,
            group,
            Some(TaskStatus::Failed {
                error: String::new(),
                attempt: 0,
            }),
            1,
        )?;
        Ok(!retrying.is_empty())
    }

    /// Tasks of a hook/group currently executing.
    pub fn query_running(
        &self,
        hook: &str,
        group: &str,
        limit: usize,
    ) -> Result<Vec<Task>, SchedulerError> {
        Ok(self
            .store
            .list_by_status(hook, group, Some(TaskStatus::Running), limit)?)
    }
}

impl<S: TaskStore> TaskScheduler for QueueScheduler<S> {
    fn is_available(&self) -> bool {
        self.store.is_open()
    }

    fn enqueue(
        &self,
        hook: &str,
        payload: serde_json::Value,
        group: &str,
    ) -> Result<TaskId, SchedulerError> {
        let task = Task::new(hook, group, payload).with_retry_policy(self.retry_policy.clone());
        let id = self.store.enqueue(task)?;
        debug!(task_id = %id, hook, group, "task enqueued");
        Ok(id)
    }

    fn has_pending_or_running(&self, hook: &str, group: &str) -> Result<bool, SchedulerError> {
        if self.has_scheduled(hook, group)? {
            return Ok(true);
        }
        Ok(!self.query_running(hook, group, 1)?.is_empty())
    }

    fn cancel_all(&self, hook: &str, group: &str) -> Result<usize, SchedulerError> {
        let cancelled = self.store.cancel_pending(hook, group)?;
        if cancelled > 0 {
            debug!(hook, group, cancelled, "cancelled queued tasks");
        }
        Ok(cancelled)
    }
}
