// src/fetch/store.rs
// =============================================================================
// Local storage for downloaded assets, one file per fingerprint:
//
//   <output_dir>/<fingerprint-hex>
//
// Writes go to a temporary sibling first and are renamed into place, so a
// crash never leaves a half-written file under the final name. A file that
// already exists under the final name is treated as already fetched.
// =============================================================================

use std::path::PathBuf;

use crate::cache::Fingerprint;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.to_hex())
    }

    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        tokio::fs::try_exists(self.path_for(fingerprint))
            .await
            .unwrap_or(false)
    }

    /// Writes the artifact atomically and returns its final path.
    pub async fn write(&self, fingerprint: &Fingerprint, body: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let final_path = self.path_for(fingerprint);
        let staging_path = self.root.join(format!("{}.part", fingerprint.to_hex()));

        tokio::fs::write(&staging_path, body).await?;
        tokio::fs::rename(&staging_path, &final_path).await?;
        Ok(final_path)
    }
}
