//! Infrastructure layer: task queue, state persistence, timer, config.

pub mod config;
pub mod state_store;
pub mod tasks;
pub mod timer;

pub use config::{ConfigError, RecalcConfig};
pub use state_store::{
    InMemoryStateStore, JsonFileStateStore, StateStore, StateStoreError, StoredState, STATE_KEY,
};
#[cfg(feature = "postgres")]
pub use state_store::PostgresStateStore;
pub use tasks::{
    InMemoryTaskStore, QueueScheduler, RetryPolicy, SchedulerError, Task, TaskExecutor,
    TaskExecutorConfig, TaskExecutorHandle, TaskResult, TaskScheduler, TaskStats, TaskStatus,
    TaskStore, TaskStoreError,
};
pub use timer::{PeriodicTimer, ScheduleEntry, TimerError, TimerHandle};
