//! HTTP admin surface of the relevance recalculation service.

pub mod app;
pub mod middleware;
