//! Task storage implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use recalc_core::TaskId;

use super::types::{Task, TaskStatus};

/// Task store abstraction.
pub trait TaskStore: Send + Sync {
    /// Enqueue a new task.
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError>;

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    fn update(&self, task: &Task) -> Result<(), TaskStoreError>;

    /// Claim the oldest pending task that is ready to execute and mark it running.
    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError>;

    /// List tasks of one hook/group, optionally filtered by status kind
    /// (`Failed { .. }` matches any failed task).
    fn list_by_status(
        &self,
        hook: &str,
        group: &str,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError>;

    /// Cancel every pending (or retry-waiting) task of one hook/group.
    /// Running tasks are left alone. Returns the number cancelled.
    fn cancel_pending(&self, hook: &str, group: &str) -> Result<usize, TaskStoreError>;

    fn stats(&self) -> Result<TaskStats, TaskStoreError>;

    /// Whether the store still accepts new tasks.
    fn is_open(&self) -> bool {
        true
    }

    /// Stop accepting new tasks.
    fn close(&self) {}
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("task queue is closed")]
    Closed,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Task statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
}

/// In-memory task store for tests/dev and the single-process binary.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    open: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            open: AtomicBool::new(true),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate a scheduler that silently loses every queued task.
    pub fn drop_pending(&self) -> usize {
        let Ok(mut tasks) = self.write() else {
            return 0;
        };
        let before = tasks.len();
        tasks.retain(|_, t| !t.status.is_pending());
        before - tasks.len()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TaskId, Task>>, TaskStoreError> {
        self.tasks
            .read()
            .map_err(|_| TaskStoreError::Storage("task lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TaskId, Task>>, TaskStoreError> {
        self.tasks
            .write()
            .map_err(|_| TaskStoreError::Storage("task lock poisoned".to_string()))
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        if !self.is_open() {
            return Err(TaskStoreError::Closed);
        }
        let mut tasks = self.write()?;
        if tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        let id = task.id;
        tasks.insert(id, task);
        Ok(id)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        Ok(self.read()?.get(&task_id).cloned())
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        let mut tasks = self.write()?;
        if !tasks.contains_key(&task.id) {
            return Err(TaskStoreError::NotFound(task.id));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        let mut tasks = self.write()?;

        // Oldest ready task first (FIFO).
        let next = tasks
            .values()
            .filter(|t| t.status.is_pending() && t.is_ready())
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);

        if let Some(task_id) = next {
            if let Some(task) = tasks.get_mut(&task_id) {
                task.mark_running();
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    fn list_by_status(
        &self,
        hook: &str,
        group: &str,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError> {
        let tasks = self.read()?;
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| {
                t.matches(hook, group)
                    && status.as_ref().map_or(true, |s| {
                        std::mem::discriminant(&t.status) == std::mem::discriminant(s)
                    })
            })
            .cloned()
            .collect();

        result.sort_by_key(|t| (t.created_at, t.id));
        result.truncate(limit);
        Ok(result)
    }

    fn cancel_pending(&self, hook: &str, group: &str) -> Result<usize, TaskStoreError> {
        let mut tasks = self.write()?;
        let mut cancelled = 0;
        for task in tasks.values_mut() {
            if task.matches(hook, group) && task.status.is_pending() {
                task.mark_cancelled();
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let tasks = self.read()?;
        let mut stats = TaskStats::default();

        for task in tasks.values() {
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::DeadLettered { .. } => stats.dead_lettered += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }

        Ok(stats)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        (**self).enqueue(task)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        (**self).get(task_id)
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        (**self).update(task)
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        (**self).claim_next()
    }

    fn list_by_status(
        &self,
        hook: &str,
        group: &str,
        status: Option<TaskStatus>,
        limit: usize,
    ) -> Result<Vec<Task>, TaskStoreError> {
        (**self).list_by_status(hook, group, status, limit)
    }

    fn cancel_pending(&self, hook: &str, group: &str) -> Result<usize, TaskStoreError> {
        (**self).cancel_pending(hook, group)
    }

    fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        (**self).stats()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&self) {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(hook: &str, group: &str) -> Task {
        Task::new(hook, group, serde_json::json!({}))
    }

    #[test]
    fn enqueue_and_claim() {
        let store = InMemoryTaskStore::new();
        let id = store.enqueue(task("batch", "recalc")).unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert!(matches!(claimed.status, TaskStatus::Running));
        assert_eq!(claimed.attempt, 1);

        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn claims_in_fifo_order() {
        let store = InMemoryTaskStore::new();
        let first = store.enqueue(task("batch", "recalc")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = store.enqueue(task("batch", "recalc")).unwrap();

        assert_eq!(store.claim_next().unwrap().unwrap().id, first);
        assert_eq!(store.claim_next().unwrap().unwrap().id, second);
    }

    #[test]
    fn cancel_pending_leaves_running_and_other_groups() {
        let store = InMemoryTaskStore::new();
        store.enqueue(task("batch", "recalc")).unwrap();
        let running = store.claim_next().unwrap().unwrap();
        store.enqueue(task("batch", "recalc")).unwrap();
        store.enqueue(task("batch", "recalc")).unwrap();
        store.enqueue(task("batch", "other")).unwrap();

        assert_eq!(store.cancel_pending("batch", "recalc").unwrap(), 2);

        let still_running = store.get(running.id).unwrap().unwrap();
        assert!(matches!(still_running.status, TaskStatus::Running));
        assert_eq!(
            store
                .list_by_status("batch", "other", Some(TaskStatus::Pending), 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn list_by_status_matches_any_failed_variant() {
        let store = InMemoryTaskStore::new();
        store.enqueue(task("batch", "recalc")).unwrap();
        let mut claimed = store.claim_next().unwrap().unwrap();
        claimed.mark_failed("boom".to_string());
        store.update(&claimed).unwrap();

        let failed = store
            .list_by_status(
                "batch",
                "recalc",
                Some(TaskStatus::Failed {
                    error: String::new(),
                    attempt: 0,
                }),
                1,
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn closed_store_rejects_enqueue() {
        let store = InMemoryTaskStore::new();
        store.close();
        assert!(!store.is_open());
        assert!(matches!(
            store.enqueue(task("batch", "recalc")),
            Err(TaskStoreError::Closed)
        ));
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryTaskStore::new();
        for _ in 0..4 {
            store.enqueue(task("batch", "recalc")).unwrap();
        }
        store.claim_next().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.running, 1);

        assert_eq!(store.drop_pending(), 3);
        assert_eq!(store.stats().unwrap().pending, 0);
    }
}
