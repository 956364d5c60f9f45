// src/download/mod.rs
// =============================================================================
// Flat list downloads: a text file of URLs, fetched in fixed-size batches
// through the same Fetcher/ThrottleGate pair the crawl uses.
// =============================================================================

mod list;

pub use list::{parse_url_list, FlatListDownloader, ListReport};
