//! Background task system with retry, backoff, and dead-lettering.
//!
//! ## Design
//!
//! - Tasks are addressed by `hook` (handler name) and `group` (dedup/cancel scope)
//! - Delivery is at-least-once; handlers must be idempotent
//! - Retry policy with fixed, linear or exponential backoff
//! - Tasks that exhaust their attempts are dead-lettered, not deleted
//!
//! ## Components
//!
//! - `Task`: payload and lifecycle metadata
//! - `TaskStore`: persistence for tasks
//! - `TaskExecutor`: runs tasks with retry logic on a background thread
//! - `TaskScheduler`: the enqueue/query/cancel contract job owners depend on

pub mod executor;
pub mod scheduler;
pub mod store;
pub mod types;

pub use executor::{
    ExecutionOutcome, ExecutorStats, TaskExecutor, TaskExecutorConfig, TaskExecutorHandle,
};
pub use scheduler::{QueueScheduler, SchedulerError, TaskScheduler};
pub use store::{InMemoryTaskStore, TaskStats, TaskStore, TaskStoreError};
pub use types::{BackoffStrategy, RetryPolicy, Task, TaskResult, TaskStatus};
