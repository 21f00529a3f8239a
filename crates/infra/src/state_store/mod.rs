//! Persistence for the single job-state record.
//!
//! The record lives under one well-known key and is read and written
//! wholesale. Every successful write bumps a revision counter so writers can
//! compare-and-swap (see [`ExpectedRevision`]); a missing record is revision `0`.

pub mod file;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use recalc_core::{ExpectedRevision, JobState};

pub use file::JsonFileStateStore;
pub use memory::InMemoryStateStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStateStore;

/// Well-known key the job state is stored under.
pub const STATE_KEY: &str = "relevance_recalc_state";

/// A persisted job state together with its revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub revision: u64,
    pub state: JobState,
}

/// Key-value persistence for the job-state record.
pub trait StateStore: Send + Sync {
    /// Read the current record, `None` when nothing was ever stored.
    fn load(&self) -> Result<Option<StoredState>, StateStoreError>;

    /// Replace the record if its revision matches `expected`.
    ///
    /// Returns the new revision.
    fn store(&self, expected: ExpectedRevision, state: &JobState) -> Result<u64, StateStoreError>;
}

impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<StoredState>, StateStoreError> {
        (**self).load()
    }

    fn store(&self, expected: ExpectedRevision, state: &JobState) -> Result<u64, StateStoreError> {
        (**self).store(expected, state)
    }
}

/// State store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateStoreError {
    /// The record moved since it was read.
    #[error("state revision conflict (expected: {expected:?}, actual: {actual})")]
    Conflict {
        expected: ExpectedRevision,
        actual: u64,
    },
    #[error("state serialization error: {0}")]
    Serialization(String),
    #[error("state I/O error: {0}")]
    Io(String),
    #[error("state backend error: {0}")]
    Backend(String),
}

impl StateStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateStoreError::Conflict { .. })
    }
}

pub(crate) fn check_revision(expected: ExpectedRevision, actual: u64) -> Result<(), StateStoreError> {
    expected
        .check(actual)
        .map_err(|_| StateStoreError::Conflict { expected, actual })
}
