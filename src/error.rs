// src/error.rs
// =============================================================================
// Error types shared by the fetch layer and the crawl pipeline.
//
// Two families:
// - FetchError: per-item failures (one URL, one entity, one manifest). These
//   are caught at the item boundary, logged, and counted. They never abort
//   sibling work.
// - CrawlError: the few failures that end a whole crawl (no snapshot could
//   be chosen from the listing).
//
// Rust concepts:
// - thiserror: derives std::error::Error and Display from attributes
// - Enums with data: each variant carries just the context it needs
// =============================================================================

use thiserror::Error;

// A connection-level failure reported by a Transport (DNS, timeout, TLS...)
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

// Per-item failure taxonomy
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure: DNS, timeout, refused connection
    #[error("connection failed for {url}: {message}")]
    Transport { url: String, message: String },

    /// The server answered with a non-success status code
    #[error("HTTP {status} from {url}")]
    Protocol { status: u16, url: String },

    /// A body arrived but did not have the shape we need
    #[error("malformed {what}: {message}")]
    Parse { what: &'static str, message: String },

    /// Valid input that we intentionally skip (wrong kind, unsupported version)
    #[error("excluded: {0}")]
    PolicyExclusion(String),

    /// Cooperative shutdown is in progress
    #[error("cancelled")]
    Cancelled,

    /// Writing a downloaded artifact to local storage failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl FetchError {
    /// Cancellation and policy exclusions are expected outcomes, not failures
    pub fn is_failure(&self) -> bool {
        !matches!(self, FetchError::Cancelled | FetchError::PolicyExclusion(_))
    }

    pub fn parse(what: &'static str, message: impl ToString) -> Self {
        FetchError::Parse {
            what,
            message: message.to_string(),
        }
    }
}

// Failures that end the whole crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("snapshot listing unavailable: {0}")]
    ListingUnavailable(#[source] FetchError),

    #[error("snapshot listing is malformed: {0}")]
    ListingMalformed(String),

    #[error("snapshot listing is empty")]
    NoSnapshots,
}
