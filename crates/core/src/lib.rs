//! `recalc-core`: building blocks shared by the recalculation workspace.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): the
//! job-state record and its transitions, identifiers, the clock seam and the
//! optimistic-concurrency expectation used by state stores.

pub mod clock;
pub mod error;
pub mod id;
pub mod revision;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{CategoryId, ItemId, TaskId};
pub use revision::ExpectedRevision;
pub use state::{Advance, JobState, JobStatus};
