// src/cache/mod.rs
// =============================================================================
// Deduplication of asset downloads.
//
// Submodules:
// - fingerprint: the identity of one asset (version + file name)
// - content: ContentCache, the fingerprint -> source URL map and its file
// =============================================================================

mod content;
mod fingerprint;

pub use content::ContentCache;
pub use fingerprint::Fingerprint;
