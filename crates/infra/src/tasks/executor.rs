//! Task executor with retry and backoff logic.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::{TaskStore, TaskStoreError};
use super::types::{Task, TaskResult, TaskStatus};

/// Task handler function type.
pub type TaskHandler = Box<dyn Fn(&Task) -> TaskResult + Send + Sync>;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct TaskExecutorConfig {
    /// How often to poll for new tasks when the queue is empty
    pub poll_interval: Duration,
    /// Thread name, also used in logs
    pub name: String,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "task-executor".to_string(),
        }
    }
}

impl TaskExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What happened to a task after one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// Failed; a retry is scheduled.
    Retrying,
    /// Failed with no attempts left.
    DeadLettered,
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, outcome: ExecutionOutcome) {
        self.tasks_processed += 1;
        match outcome {
            ExecutionOutcome::Succeeded => self.tasks_succeeded += 1,
            ExecutionOutcome::Retrying => self.tasks_failed += 1,
            ExecutionOutcome::DeadLettered => {
                self.tasks_failed += 1;
                self.tasks_dead_lettered += 1;
            }
        }
    }
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct TaskExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl TaskExecutorHandle {
    /// Request graceful shutdown and wait for the current task to finish.
    ///
    /// The store is closed, so the scheduling adapter reports itself unavailable.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Background task executor.
///
/// Claims ready tasks from a store, runs the handler registered for the task's
/// hook and applies the task's retry policy. Delivery is at-least-once: a
/// handler may see the same payload again after a failure.
pub struct TaskExecutor<S: TaskStore> {
    store: S,
    handlers: HashMap<String, TaskHandler>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl<S: TaskStore> TaskExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
        }
    }

    /// Register the handler for a hook (replaces any previous one).
    pub fn register_handler<F>(&mut self, hook: impl Into<String>, handler: F)
    where
        F: Fn(&Task) -> TaskResult + Send + Sync + 'static,
    {
        self.handlers.insert(hook.into(), Box::new(handler));
    }

    pub fn has_handler(&self, hook: &str) -> bool {
        self.handlers.contains_key(hook)
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Claim and execute a single ready task, if any.
    pub fn run_next(&self) -> Result<Option<(Task, ExecutionOutcome)>, TaskStoreError> {
        let Some(mut task) = self.store.claim_next()? else {
            return Ok(None);
        };

        debug!(task_id = %task.id, hook = %task.hook, attempt = task.attempt, "claimed task");
        let outcome = self.execute(&mut task)?;

        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(outcome);

        Ok(Some((task, outcome)))
    }

    /// Execute ready tasks until none are left; returns how many ran.
    ///
    /// Tasks enqueued by handlers are picked up in the same call, so a
    /// self-continuing chain is drained to its end.
    pub fn run_pending(&self) -> Result<usize, TaskStoreError> {
        let mut ran = 0;
        while self.run_next()?.is_some() {
            ran += 1;
        }
        Ok(ran)
    }

    fn execute(&self, task: &mut Task) -> Result<ExecutionOutcome, TaskStoreError> {
        let result = match self.handlers.get(&task.hook) {
            Some(handler) => panic::catch_unwind(AssertUnwindSafe(|| handler(&*task)))
                .unwrap_or_else(|_| TaskResult::Failure("task handler panicked".to_string())),
            None => {
                warn!(task_id = %task.id, hook = %task.hook, "no handler for task");
                TaskResult::Failure(format!("no handler for hook: {}", task.hook))
            }
        };

        match result {
            TaskResult::Success => {
                task.mark_completed();
                debug!(task_id = %task.id, "task completed");
            }
            TaskResult::Failure(error) => {
                task.mark_failed(error);
            }
            TaskResult::RetryAfter(delay) => {
                task.mark_failed("retry after delay".to_string());
                if task.status.is_pending() {
                    task.scheduled_at =
                        Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
                }
            }
        }

        self.store.update(task)?;

        Ok(match &task.status {
            TaskStatus::DeadLettered { error, attempts } => {
                warn!(task_id = %task.id, hook = %task.hook, attempts, error = %error, "task dead-lettered");
                ExecutionOutcome::DeadLettered
            }
            TaskStatus::Failed { error, attempt } => {
                debug!(task_id = %task.id, hook = %task.hook, attempt, error = %error, "task failed, retry scheduled");
                ExecutionOutcome::Retrying
            }
            _ => ExecutionOutcome::Succeeded,
        })
    }
}

impl<S: TaskStore + 'static> TaskExecutor<S> {
    /// Spawn the executor in a background thread.
    pub fn spawn(self, config: TaskExecutorConfig) -> std::io::Result<TaskExecutorHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = self.stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || executor_loop(self, config, shutdown_rx))?;

        Ok(TaskExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn executor_loop<S: TaskStore>(
    executor: TaskExecutor<S>,
    config: TaskExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(executor = %config.name, "task executor started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        executor
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .uptime_secs = start_time.elapsed().as_secs();

        match executor.run_next() {
            Ok(Some(_)) => {}
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(executor = %config.name, error = %e, "failed to run task");
                thread::sleep(config.poll_interval);
            }
        }
    }

    executor.store.close();
    info!(executor = %config.name, "task executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::store::InMemoryTaskStore;
    use crate::tasks::types::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(hook: &str) -> Task {
        Task::new(hook, "group", serde_json::json!({}))
    }

    #[test]
    fn execute_successful_task() {
        let store = InMemoryTaskStore::arc();
        let mut executor = TaskExecutor::new(store.clone());
        executor.register_handler("test", |_task| TaskResult::Success);

        let id = store.enqueue(task("test")).unwrap();
        let (ran, outcome) = executor.run_next().unwrap().unwrap();

        assert_eq!(ran.id, id);
        assert_eq!(outcome, ExecutionOutcome::Succeeded);
        assert!(matches!(
            store.get(id).unwrap().unwrap().status,
            TaskStatus::Completed
        ));
    }

    #[test]
    fn failing_task_retries_then_dead_letters() {
        let store = InMemoryTaskStore::arc();
        let mut executor = TaskExecutor::new(store.clone());
        executor.register_handler("test", |_task| TaskResult::Failure("boom".to_string()));

        store
            .enqueue(task("test").with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO)))
            .unwrap();

        assert_eq!(executor.run_pending().unwrap(), 2);
        let stats = executor.stats();
        assert_eq!(stats.tasks_failed, 2);
        assert_eq!(stats.tasks_dead_lettered, 1);
    }

    #[test]
    fn panicking_handler_fails_the_task() {
        let store = InMemoryTaskStore::arc();
        let mut executor = TaskExecutor::new(store.clone());
        executor.register_handler("test", |_task| panic!("handler bug"));

        let id = store
            .enqueue(task("test").with_retry_policy(RetryPolicy::no_retry()))
            .unwrap();
        let (_, outcome) = executor.run_next().unwrap().unwrap();

        assert_eq!(outcome, ExecutionOutcome::DeadLettered);
        assert!(store.get(id).unwrap().unwrap().status.is_terminal());
    }

    #[test]
    fn unknown_hook_fails() {
        let store = InMemoryTaskStore::arc();
        let executor = TaskExecutor::new(store.clone());
        store
            .enqueue(task("missing").with_retry_policy(RetryPolicy::no_retry()))
            .unwrap();

        let (_, outcome) = executor.run_next().unwrap().unwrap();
        assert_eq!(outcome, ExecutionOutcome::DeadLettered);
    }

    #[test]
    fn handlers_can_chain_tasks() {
        let store = InMemoryTaskStore::arc();
        let mut executor = TaskExecutor::new(store.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let chain_store = store.clone();
        let chain_runs = runs.clone();
        executor.register_handler("chain", move |_task| {
            if chain_runs.fetch_add(1, Ordering::SeqCst) < 2 {
                chain_store.enqueue(task("chain")).unwrap();
            }
            TaskResult::Success
        });

        store.enqueue(task("chain")).unwrap();
        assert_eq!(executor.run_pending().unwrap(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spawned_executor_drains_and_closes_on_shutdown() {
        let store = InMemoryTaskStore::arc();
        let mut executor = TaskExecutor::new(store.clone());
        executor.register_handler("test", |_task| TaskResult::Success);
        let id = store.enqueue(task("test")).unwrap();

        let handle = executor
            .spawn(TaskExecutorConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !matches!(store.get(id).unwrap().unwrap().status, TaskStatus::Completed) {
            assert!(Instant::now() < deadline, "task never completed");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.stats().tasks_succeeded, 1);

        handle.shutdown();
        assert!(!store.is_open());
    }
}
