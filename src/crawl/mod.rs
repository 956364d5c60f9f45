// src/crawl/mod.rs
// =============================================================================
// The snapshot-driven crawl.
//
// Submodules:
// - catalog: parsing of listing, snapshot, entity and manifest bodies
// - pipeline: CrawlPipeline, the staged walk from snapshot to assets
// =============================================================================

mod catalog;
mod pipeline;

pub use pipeline::{CrawlPipeline, CrawlReport};
