//! Engine error model.

use recalc_catalog::{CatalogError, RelevanceError};
use recalc_core::{DomainError, ItemId};
use recalc_infra::{SchedulerError, StateStoreError};

#[derive(Debug, thiserror::Error)]
pub enum RecalcError {
    /// The task facility cannot accept work; nothing was changed.
    #[error("task scheduler unavailable")]
    SchedulerUnavailable,

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Scheduler(SchedulerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("recompute failed for item {item}: {source}")]
    Recompute {
        item: ItemId,
        #[source]
        source: RelevanceError,
    },

    /// Clearing computed scores failed.
    #[error(transparent)]
    Relevance(RelevanceError),

    #[error("invalid batch payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<SchedulerError> for RecalcError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Unavailable => RecalcError::SchedulerUnavailable,
            other => RecalcError::Scheduler(other),
        }
    }
}

impl RecalcError {
    /// Stable machine-readable code, used by the admin surface.
    pub fn code(&self) -> &'static str {
        match self {
            RecalcError::SchedulerUnavailable => "scheduler_unavailable",
            RecalcError::State(_) => "state_store_error",
            RecalcError::Scheduler(_) => "scheduler_error",
            RecalcError::Catalog(_) => "catalog_error",
            RecalcError::Recompute { .. } => "recompute_failed",
            RecalcError::Relevance(_) => "relevance_error",
            RecalcError::InvalidPayload(_) => "invalid_payload",
            RecalcError::Domain(_) => "invalid_state",
        }
    }
}
