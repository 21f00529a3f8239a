use serde::{Deserialize, Serialize};

use recalc_core::{CategoryId, ItemId};

/// Catalog item publication lifecycle.
///
/// Only `Published` items are counted and recalculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Draft,
    Published,
    Archived,
}

/// A catalog item as the recalculation job sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub status: ItemStatus,
    #[serde(default)]
    pub categories: Vec<CategoryId>,
}

impl CatalogItem {
    pub fn published(id: u64, categories: impl IntoIterator<Item = u64>) -> Self {
        Self {
            id: ItemId::new(id),
            status: ItemStatus::Published,
            categories: categories.into_iter().map(CategoryId::new).collect(),
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_published(&self) -> bool {
        self.status == ItemStatus::Published
    }
}
