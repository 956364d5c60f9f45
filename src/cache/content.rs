// src/cache/content.rs
// =============================================================================
// ContentCache: remembers which assets were already retrieved.
//
// - has(fp) is checked before an asset download; a hit skips the network.
// - remember(fp, url) is called only after a successful download.
// - save() writes the whole mapping to a JSON file { "<fp-hex>": "<url>" }.
// - load() reads that file back (used when a run resumes a previous one).
//
// Saving is wholesale: the file is rewritten from scratch each time, via a
// temporary file that is renamed over the old one.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::Fingerprint;

#[derive(Debug)]
pub struct ContentCache {
    path: PathBuf,
    entries: Mutex<HashMap<Fingerprint, String>>,
}

impl ContentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Fingerprint, String>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has(&self, fingerprint: &Fingerprint) -> bool {
        self.entries().contains_key(fingerprint)
    }

    /// Records a retrieved asset. The last URL for a fingerprint wins.
    pub fn remember(&self, fingerprint: Fingerprint, source_url: impl Into<String>) {
        self.entries().insert(fingerprint, source_url.into());
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Rewrites the cache file with every entry.
    ///
    /// The entries are serialized right away; only the file write is handed
    /// to the blocking pool.
    pub async fn save(&self) -> Result<()> {
        // Sorted so that repeated saves of the same content are byte-identical
        let sorted: BTreeMap<Fingerprint, String> = self
            .entries()
            .iter()
            .map(|(fp, url)| (*fp, url.clone()))
            .collect();
        let json = serde_json::to_string_pretty(&sorted)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, json.as_bytes()))
            .await
            .context("cache writer task failed")??;

        info!(entries = sorted.len(), path = %self.path.display(), "cache saved");
        Ok(())
    }

    /// Merges entries from the cache file. A missing file counts as empty.
    pub async fn load(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            debug!(path = %self.path.display(), "no cache file to load");
            return Ok(0);
        }

        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read cache file {}", self.path.display()))?;
        let stored: HashMap<Fingerprint, String> = serde_json::from_str(&text)
            .with_context(|| format!("Cache file {} is malformed", self.path.display()))?;

        let count = stored.len();
        self.entries().extend(stored);
        info!(entries = count, path = %self.path.display(), "cache loaded");
        Ok(count)
    }
}

// Temp file in the same directory, renamed over `path`
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;

    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(contents)?;
    file.persist(path)
        .with_context(|| format!("Failed to write cache file {}", path.display()))?;
    Ok(())
}
