//! Catalog source abstraction.

use recalc_core::{CategoryId, ItemId};

/// Read-only view of the catalog used by the batch processor.
pub trait CatalogSource: Send + Sync {
    /// Number of items with a published status.
    fn count_published(&self) -> Result<u64, CatalogError>;

    /// Up to `limit` published item ids starting at `offset`, ordered by id ascending.
    ///
    /// Implementations must not compute a total count here; large catalogs call
    /// this once per batch.
    fn list_published_ids(&self, offset: u64, limit: u64) -> Result<Vec<ItemId>, CatalogError>;

    /// Category membership of an item (empty when uncategorised or unknown).
    fn categories_of(&self, item: ItemId) -> Result<Vec<CategoryId>, CatalogError>;
}

/// Catalog access error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("invalid catalog data: {0}")]
    InvalidData(String),
    #[error("io error: {0}")]
    Io(String),
}
