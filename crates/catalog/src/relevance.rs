//! Relevance engine abstraction.

use recalc_core::{CategoryId, ItemId};

/// Computes and stores the derived relevance score of an item.
///
/// `recompute` must be idempotent per item: applying it twice for the same
/// inputs leaves the same stored values as applying it once. Batches are
/// re-run after failures and duplicated task deliveries.
pub trait RelevanceEngine: Send + Sync {
    fn recompute(&self, item: ItemId, categories: &[CategoryId]) -> Result<(), RelevanceError>;

    /// Drop every computed score.
    fn clear_all(&self) -> Result<(), RelevanceError>;
}

/// Relevance computation failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelevanceError {
    #[error("recompute failed for item {item}: {reason}")]
    Recompute { item: ItemId, reason: String },
    #[error("storage error: {0}")]
    Storage(String),
}
