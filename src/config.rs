// src/config.rs
// =============================================================================
// Configuration for both pipelines.
//
// Layering (later wins):
// 1. Built-in defaults (Config::default)
// 2. An optional TOML file passed with --config
// 3. Command-line flags (applied in cli.rs)
//
// Config::validate() runs after all layers are merged.
//
// Example file:
//
//   maxSimultaneousRequests = 10
//   targetDownloadCount = 500
//   snapshotEntityBand = { min = 18000, max = 23000 }
//
//   [endpoints]
//   contentsUrl = "https://peer.example.org/content/contents/"
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    /// ThrottleGate limit: requests in flight at once
    pub max_simultaneous_requests: usize,
    /// URLs dispatched before the flat-list downloader waits for them all
    pub flat_batch_size: usize,
    /// Entities processed together before the crawl waits for them all
    pub entity_batch_size: usize,
    /// Downloads after which the crawl saves its cache and shuts down
    pub target_download_count: usize,
    /// Preferred snapshot size
    pub snapshot_entity_band: EntityBand,
    /// Manifests whose version number is at or above this are skipped
    pub manifest_version_cutoff: u32,
    /// Only manifest files ending with this are downloaded
    pub platform_suffix_filter: String,
    /// Flat-list URLs starting with this are fetched as binary assets
    pub asset_host_prefix: String,
    pub endpoints: Endpoints,
    /// Where downloaded assets are stored
    pub output_dir: PathBuf,
    /// Persisted ContentCache location
    pub cache_file: PathBuf,
    /// Load the cache file before crawling
    pub resume_cache: bool,
    pub request_timeout_secs: u64,
}

// Open range of entity counts: both bounds are outside the band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityBand {
    pub min: u64,
    pub max: u64,
}

impl EntityBand {
    pub fn contains(&self, count: u64) -> bool {
        count > self.min && count < self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct Endpoints {
    /// Catalog listing of snapshots
    pub snapshots_url: String,
    /// Content-addressed retrieval; the hash or entity id is appended
    pub contents_url: String,
    /// Placeholders: {entity}, {platform}
    pub manifest_url_template: String,
    /// Placeholders: {version}, {file}
    pub asset_url_template: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_simultaneous_requests: 15,
            flat_batch_size: 100,
            entity_batch_size: 20,
            target_download_count: 13_000,
            snapshot_entity_band: EntityBand {
                min: 19_000,
                max: 22_000,
            },
            manifest_version_cutoff: 25,
            platform_suffix_filter: "windows".to_string(),
            asset_host_prefix: "https://ab-cdn.decentraland.org/v".to_string(),
            endpoints: Endpoints::default(),
            output_dir: PathBuf::from("asset-bundles"),
            cache_file: PathBuf::from("AssetBundleCache.json"),
            resume_cache: false,
            request_timeout_secs: 30,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            snapshots_url: "https://peer.decentraland.org/content/snapshots".to_string(),
            contents_url: "https://peer.decentraland.org/content/contents/".to_string(),
            manifest_url_template: "https://ab-cdn.decentraland.org/manifest/{entity}_{platform}.json"
                .to_string(),
            asset_url_template: "https://ab-cdn.decentraland.org/{version}/{file}".to_string(),
        }
    }
}

impl Endpoints {
    /// Content-addressed URL for a snapshot hash or an entity id
    pub fn content_url(&self, id: &str) -> String {
        format!("{}{}", self.contents_url, id)
    }

    pub fn manifest_url(&self, entity_id: &str, platform: &str) -> String {
        self.manifest_url_template
            .replace("{entity}", entity_id)
            .replace("{platform}", platform)
    }

    pub fn asset_url(&self, version: &str, file: &str) -> String {
        self.asset_url_template
            .replace("{version}", version)
            .replace("{file}", file)
    }
}

impl Config {
    /// Defaults, overlaid with the TOML file when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_simultaneous_requests == 0 {
            bail!("maxSimultaneousRequests must be at least 1");
        }
        if self.flat_batch_size == 0 {
            bail!("flatBatchSize must be at least 1");
        }
        if self.entity_batch_size == 0 {
            bail!("entityBatchSize must be at least 1");
        }
        if self.target_download_count == 0 {
            bail!("targetDownloadCount must be at least 1");
        }
        if self.snapshot_entity_band.min >= self.snapshot_entity_band.max {
            bail!(
                "snapshotEntityBand is empty: min {} >= max {}",
                self.snapshot_entity_band.min,
                self.snapshot_entity_band.max
            );
        }

        let endpoints = &self.endpoints;
        Url::parse(&endpoints.snapshots_url).context("endpoints.snapshotsUrl is not a valid URL")?;
        Url::parse(&endpoints.contents_url).context("endpoints.contentsUrl is not a valid URL")?;
        // Templates must still be URLs once their placeholders are filled in
        Url::parse(&endpoints.manifest_url("entity", &self.platform_suffix_filter))
            .context("endpoints.manifestUrlTemplate is not a valid URL")?;
        Url::parse(&endpoints.asset_url("v1", "file"))
            .context("endpoints.assetUrlTemplate is not a valid URL")?;

        Ok(())
    }
}
