//! Catalog and relevance collaborators.
//!
//! The recalculation engine only sees the traits in this crate. The in-memory
//! implementations back tests, benchmarks and the standalone admin binary.

pub mod item;
pub mod memory;
pub mod relevance;
pub mod source;

pub use item::{CatalogItem, ItemStatus};
pub use memory::{InMemoryCatalog, InMemoryRelevance, RelevanceRecord};
pub use relevance::{RelevanceEngine, RelevanceError};
pub use source::{CatalogError, CatalogSource};
