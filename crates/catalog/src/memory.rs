//! In-memory catalog and relevance store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use recalc_core::{CategoryId, ItemId};

use crate::item::{CatalogItem, ItemStatus};
use crate::relevance::{RelevanceEngine, RelevanceError};
use crate::source::{CatalogError, CatalogSource};

/// JSON seed format: `{"items": [{"id": 1, "status": "published", "categories": [3]}]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogSeed {
    #[serde(default)]
    items: Vec<CatalogItem>,
}

/// In-memory catalog, ordered by item id.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<BTreeMap<ItemId, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.upsert(item);
        }
        catalog
    }

    /// `count` published items with ids `1..=count`, each in category `id % categories + 1`.
    pub fn sequential(count: u64, categories: u64) -> Self {
        let categories = categories.max(1);
        Self::from_items((1..=count).map(|id| CatalogItem::published(id, [id % categories + 1])))
    }

    /// Load a catalog seed from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(format!("{}: {}", path.display(), e)))?;
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::InvalidData(format!("{}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), items = seed.items.len(), "loaded catalog seed");
        Ok(Self::from_items(seed.items))
    }

    pub fn upsert(&self, item: CatalogItem) {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert(item.id, item);
    }

    pub fn set_status(&self, id: ItemId, status: ItemStatus) -> bool {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        match items.get_mut(&id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: ItemId) -> Option<CatalogItem> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.remove(&id)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<ItemId, CatalogItem>>, CatalogError> {
        self.items
            .read()
            .map_err(|_| CatalogError::Unavailable("catalog lock poisoned".to_string()))
    }
}

impl CatalogSource for InMemoryCatalog {
    fn count_published(&self) -> Result<u64, CatalogError> {
        let items = self.read()?;
        Ok(items.values().filter(|i| i.is_published()).count() as u64)
    }

    fn list_published_ids(&self, offset: u64, limit: u64) -> Result<Vec<ItemId>, CatalogError> {
        let items = self.read()?;
        Ok(items
            .values()
            .filter(|i| i.is_published())
            .skip(offset as usize)
            .take(limit as usize)
            .map(|i| i.id)
            .collect())
    }

    fn categories_of(&self, item: ItemId) -> Result<Vec<CategoryId>, CatalogError> {
        let items = self.read()?;
        Ok(items
            .get(&item)
            .map(|i| i.categories.clone())
            .unwrap_or_default())
    }
}

/// Stored relevance for one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceRecord {
    pub categories: Vec<CategoryId>,
    pub score: f64,
    /// How many times the item has been recomputed (not part of the score).
    pub recomputations: u64,
}

/// In-memory relevance store with a deterministic reference scorer.
///
/// Score = `(1 + views) * category_count`. Views are usage signals recorded
/// through [`InMemoryRelevance::record_view`].
#[derive(Debug, Default)]
pub struct InMemoryRelevance {
    records: RwLock<HashMap<ItemId, RelevanceRecord>>,
    views: RwLock<HashMap<ItemId, u64>>,
}

impl InMemoryRelevance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_view(&self, item: ItemId) {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        *views.entry(item).or_insert(0) += 1;
    }

    pub fn get(&self, item: ItemId) -> Option<RelevanceRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(&item).cloned()
    }

    pub fn len(&self) -> usize {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scores only, keyed by item (ignores recompute counters).
    pub fn scores(&self) -> BTreeMap<ItemId, f64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().map(|(id, r)| (*id, r.score)).collect()
    }
}

impl RelevanceEngine for InMemoryRelevance {
    fn recompute(&self, item: ItemId, categories: &[CategoryId]) -> Result<(), RelevanceError> {
        let views = {
            let views = self
                .views
                .read()
                .map_err(|_| RelevanceError::Storage("views lock poisoned".to_string()))?;
            views.get(&item).copied().unwrap_or(0)
        };

        let mut sorted = categories.to_vec();
        sorted.sort();
        sorted.dedup();
        let score = (1 + views) as f64 * sorted.len() as f64;

        let mut records = self
            .records
            .write()
            .map_err(|_| RelevanceError::Storage("relevance lock poisoned".to_string()))?;
        let recomputations = records.get(&item).map_or(0, |r| r.recomputations) + 1;
        records.insert(
            item,
            RelevanceRecord {
                categories: sorted,
                score,
                recomputations,
            },
        );
        Ok(())
    }

    fn clear_all(&self) -> Result<(), RelevanceError> {
        self.records
            .write()
            .map_err(|_| RelevanceError::Storage("relevance lock poisoned".to_string()))?
            .clear();
        self.views
            .write()
            .map_err(|_| RelevanceError::Storage("views lock poisoned".to_string()))?
            .clear();
        Ok(())
    }
}
