//! Optimistic concurrency expectation for the persisted job-state record.

use crate::error::{DomainError, DomainResult};

/// Revision a writer expects the stored record to be at.
///
/// Every successful write bumps the stored revision by one. A missing record
/// is at revision `0`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedRevision {
    /// Skip revision checking (wholesale overwrite, e.g. a fresh start).
    Any,
    /// Require the stored record to be at an exact revision.
    Exact(u64),
}

impl ExpectedRevision {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedRevision::Any => true,
            ExpectedRevision::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "state revision moved (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
