//! Background relevance recalculation.
//!
//! A [`Recalculator`] walks the published catalog in fixed-size batches,
//! one batch task at a time, persisting progress after each batch so the job
//! survives restarts. A periodic watchdog re-issues the next batch whenever
//! the job is running but no batch task is queued or executing.
//!
//! ```text
//! start() ──► batch(0) ──► batch(200) ──► … ──► completed
//!                 ▲
//!   watchdog ─────┘ (re-issue at next_offset when the chain stalls)
//! ```

pub mod batch;
pub mod error;
pub mod recalculator;
pub mod watchdog;
pub mod wiring;

pub use batch::{BatchOutcome, StaleReason};
pub use error::RecalcError;
pub use recalculator::{
    BatchPayload, Progress, Recalculator, BATCH_HOOK, TASK_GROUP, WATCHDOG_SCHEDULE,
};
pub use watchdog::WatchdogOutcome;
