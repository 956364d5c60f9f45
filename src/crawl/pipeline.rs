// src/crawl/pipeline.rs
// =============================================================================
// CrawlPipeline: snapshot -> entities -> manifests -> asset downloads.
//
// Stages (each checks the cancellation token on entry):
// 1. Fetch the snapshot listing and pick one snapshot (fatal on failure)
// 2. Fetch that snapshot and pull the entity ids out of it
// 3. Walk the ids in batches. For each entity:
//    a. fetch its metadata, keep only wearables
//    b. fetch its manifest, drop versions at/above the cutoff
//    c. for each platform file: fingerprint it, skip it if cached,
//       otherwise download it into the artifact store
// 4. Each successful download is remembered in the ContentCache. When the
//    download target is reached the cache is saved and the run cancelled.
//
// Anything that goes wrong for one entity, manifest or asset is logged,
// counted as a failure and skipped. Only stage 1 ends the crawl with an
// error. An unreadable snapshot in stage 2 ends it early with nothing to do.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ContentCache, Fingerprint};
use crate::config::Config;
use crate::crawl::catalog::{self, Snapshot, TARGET_KIND};
use crate::error::{CrawlError, FetchError};
use crate::fetch::{CounterSnapshot, Fetcher, Outcome, Payload, Request, Transport};

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    /// Hash of the snapshot that was crawled, if one was selected
    pub snapshot: Option<String>,
    pub entity_ids: usize,
    pub wearables: usize,
    pub cached_entries: usize,
    pub cancelled: bool,
    pub counters: CounterSnapshot,
}

// The caller's token plus a child that stops this run's own requests.
// Cancelling `caller` also cancels `work`, not the other way round.
struct Scope<'c> {
    caller: &'c CancellationToken,
    work: CancellationToken,
}

pub struct CrawlPipeline<'a, T: Transport> {
    fetcher: &'a Fetcher<T>,
    cache: &'a ContentCache,
    config: &'a Config,
    // Fingerprints with a download currently in flight
    claims: Mutex<HashSet<Fingerprint>>,
    wearables: AtomicUsize,
}

impl<'a, T: Transport> CrawlPipeline<'a, T> {
    pub fn new(fetcher: &'a Fetcher<T>, cache: &'a ContentCache, config: &'a Config) -> Self {
        Self {
            fetcher,
            cache,
            config,
            claims: Mutex::new(HashSet::new()),
            wearables: AtomicUsize::new(0),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<CrawlReport, CrawlError> {
        self.fetcher.counters().reset();
        self.wearables.store(0, Ordering::SeqCst);
        let scope = Scope {
            caller: cancel,
            work: cancel.child_token(),
        };
        let cancel = &scope.work;

        // Stage 1
        if cancel.is_cancelled() {
            return Ok(self.finish(None, 0, cancel));
        }
        info!("selecting snapshot");
        let Some(snapshot) = self.select_snapshot(cancel).await? else {
            return Ok(self.finish(None, 0, cancel));
        };

        // Stage 2
        if cancel.is_cancelled() {
            return Ok(self.finish(Some(snapshot.hash), 0, cancel));
        }
        let url = self.config.endpoints.content_url(&snapshot.hash);
        info!(hash = %snapshot.hash, entities = snapshot.entity_count, "fetching snapshot content");
        let body = match self.fetch_text(&url, cancel).await {
            Ok(body) => body,
            Err(FetchError::Cancelled) => return Ok(self.finish(Some(snapshot.hash), 0, cancel)),
            Err(e) => {
                warn!(hash = %snapshot.hash, error = %e, "snapshot unavailable, nothing to crawl");
                self.fetcher.counters().record_item_failure();
                self.save_cache().await;
                return Ok(self.finish(Some(snapshot.hash), 0, cancel));
            }
        };
        let entity_ids = catalog::extract_entity_ids(&body);
        info!(count = entity_ids.len(), "entity ids extracted");

        // Stage 3
        for (index, batch) in entity_ids.chunks(self.config.entity_batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                info!(batch = index, "cancelled, not dispatching further entities");
                break;
            }
            debug!(batch = index, size = batch.len(), "processing entity batch");
            join_all(batch.iter().map(|id| self.process_entity(id, &scope))).await;
        }

        self.save_cache().await;
        Ok(self.finish(Some(snapshot.hash), entity_ids.len(), cancel))
    }

    fn finish(&self, snapshot: Option<String>, entity_ids: usize, cancel: &CancellationToken) -> CrawlReport {
        let report = CrawlReport {
            snapshot,
            entity_ids,
            wearables: self.wearables.load(Ordering::SeqCst),
            cached_entries: self.cache.len(),
            cancelled: cancel.is_cancelled(),
            counters: self.fetcher.counters().snapshot(),
        };
        info!(
            downloaded = report.counters.total_downloaded,
            cache_hits = report.counters.cache_hits,
            failed = report.counters.failed,
            failed_items = report.counters.failed_items,
            cancelled = report.cancelled,
            "crawl finished"
        );
        report
    }

    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String, FetchError> {
        let payload = self.fetcher.fetch(Request::text(url), cancel).await.into_result(url)?;
        Ok(payload.into_text())
    }

    // Ok(None) means the crawl was cancelled while selecting
    async fn select_snapshot(&self, cancel: &CancellationToken) -> Result<Option<Snapshot>, CrawlError> {
        let listing_url = &self.config.endpoints.snapshots_url;
        let body = match self.fetch_text(listing_url, cancel).await {
            Ok(body) => body,
            Err(FetchError::Cancelled) => return Ok(None),
            Err(e) => return Err(CrawlError::ListingUnavailable(e)),
        };

        let snapshots = catalog::parse_snapshots(&body).map_err(|e| CrawlError::ListingMalformed(e.to_string()))?;
        let band = &self.config.snapshot_entity_band;
        let chosen = catalog::select_snapshot(&snapshots, band).ok_or(CrawlError::NoSnapshots)?;

        if !band.contains(chosen.entity_count) {
            warn!(
                hash = %chosen.hash,
                entities = chosen.entity_count,
                "no snapshot in the expected band, using the largest"
            );
        }
        Ok(Some(chosen.clone()))
    }

    async fn process_entity(&self, entity_id: &str, scope: &Scope<'_>) {
        match self.try_process_entity(entity_id, scope).await {
            Ok(()) | Err(FetchError::Cancelled) => {}
            Err(e) if e.is_failure() => {
                warn!(entity = entity_id, error = %e, "entity skipped");
                self.fetcher.counters().record_item_failure();
                self.fetcher.counters().record_skip();
            }
            Err(e) => {
                debug!(entity = entity_id, reason = %e, "entity skipped");
                self.fetcher.counters().record_skip();
            }
        }
    }

    async fn try_process_entity(&self, entity_id: &str, scope: &Scope<'_>) -> Result<(), FetchError> {
        let cancel = &scope.work;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let body = self
            .fetch_text(&self.config.endpoints.content_url(entity_id), cancel)
            .await?;
        let entity = catalog::parse_entity(entity_id, &body)?;
        if entity.kind != TARGET_KIND {
            return Err(FetchError::PolicyExclusion(format!("{} is a {}", entity.id, entity.kind)));
        }
        self.wearables.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let platform = &self.config.platform_suffix_filter;
        let manifest_url = self.config.endpoints.manifest_url(entity_id, platform);
        debug!(url = %manifest_url, "fetching manifest");
        let manifest = catalog::parse_manifest(&self.fetch_text(&manifest_url, cancel).await?)?;

        // Newer manifests address assets differently
        let version = manifest.version_number()?;
        if version >= self.config.manifest_version_cutoff {
            return Err(FetchError::PolicyExclusion(format!(
                "manifest version {} is at or above {}",
                manifest.version, self.config.manifest_version_cutoff
            )));
        }

        let downloads: Vec<_> = manifest
            .platform_files(platform)
            .filter_map(|file| {
                let fingerprint = Fingerprint::compute(&manifest.version, file);
                if self.cache.has(&fingerprint) || !self.claim(fingerprint) {
                    self.fetcher.counters().record_cache_hit();
                    return None;
                }
                let url = self.config.endpoints.asset_url(&manifest.version, file);
                Some(self.download_asset(fingerprint, url, scope))
            })
            .collect();

        join_all(downloads).await;
        Ok(())
    }

    async fn download_asset(&self, fingerprint: Fingerprint, url: String, scope: &Scope<'_>) {
        match self.fetcher.fetch(Request::verified(&url, fingerprint), &scope.work).await {
            Outcome::Success(Payload::Stored { reused: true, .. }) => {
                self.cache.remember(fingerprint, url);
                self.fetcher.counters().record_cache_hit();
            }
            Outcome::Success(_) => {
                self.cache.remember(fingerprint, url.as_str());
                let total = self.fetcher.counters().record_download();
                info!(url = %url, %fingerprint, total, "asset downloaded");
                if total == self.config.target_download_count {
                    self.shutdown(scope).await;
                }
            }
            // Failures were already logged by the fetcher
            _ => {}
        }
        self.release(&fingerprint);
    }

    // Stops new requests, saves the cache, then cancels the caller's token
    async fn shutdown(&self, scope: &Scope<'_>) {
        info!(target = self.config.target_download_count, "download target reached, shutting down");
        scope.work.cancel();
        self.save_cache().await;
        scope.caller.cancel();
    }

    async fn save_cache(&self) {
        if let Err(e) = self.cache.save().await {
            warn!(error = %e, "failed to save cache");
        }
    }

    // false if another task is already downloading this fingerprint
    fn claim(&self, fingerprint: Fingerprint) -> bool {
        self.claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(fingerprint)
    }

    fn release(&self, fingerprint: &Fingerprint) {
        self.claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(fingerprint);
    }
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. What is `let ... else`?
//    - `let Some(x) = expr else { return ... };` binds x or leaves early
//    - It keeps the happy path unindented
//
// 2. Why borrow (&'a) everything in CrawlPipeline?
//    - The fetcher, cache and config outlive one run
//    - Borrowing them lets tests inspect the cache after the run
//
// 3. Why a claim set next to the cache?
//    - Entities of one batch run concurrently
//    - Two manifests can list the same file; the cache only learns about it
//      after the first download finishes, the claim set knows right away
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityBand, Endpoints};
    use crate::fetch::mock::MockTransport;
    use crate::fetch::{ArtifactStore, Counters, ThrottleGate};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const LISTING: &str = "https://peer.test/snapshots";

    fn test_config(dir: &Path) -> Config {
        Config {
            entity_batch_size: 2,
            endpoints: Endpoints {
                snapshots_url: LISTING.to_string(),
                contents_url: "https://peer.test/contents/".to_string(),
                manifest_url_template: "https://cdn.test/manifest/{entity}_{platform}.json".to_string(),
                asset_url_template: "https://cdn.test/{version}/{file}".to_string(),
            },
            output_dir: dir.join("bundles"),
            cache_file: dir.join("cache.json"),
            ..Config::default()
        }
    }

    fn fetcher(transport: MockTransport, config: &Config) -> Fetcher<MockTransport> {
        Fetcher::new(
            transport,
            ThrottleGate::new(config.max_simultaneous_requests),
            Arc::new(Counters::new()),
            ArtifactStore::new(&config.output_dir),
        )
    }

    // A small catalog:
    // - w1, w2: wearables sharing one asset (shared_windows)
    // - emote1: not a wearable
    // - gone: metadata 404
    // - fresh: wearable with a v25 manifest
    fn catalog() -> MockTransport {
        MockTransport::new()
            .with_body(
                LISTING,
                r#"[{"hash":"small","numberOfEntities":5000},{"hash":"good","numberOfEntities":20000},{"hash":"huge","numberOfEntities":30000}]"#,
            )
            .with_body(
                "https://peer.test/contents/good",
                "{\"entityId\":\"w1\",\"entityType\":\"wearable\"}\n{\"entityId\":\"w2\"}\n{\"entityId\":\"emote1\"}\n{\"entityId\":\"gone\"}\n{\"entityId\":\"fresh\"}",
            )
            .with_body("https://peer.test/contents/w1", r#"{"type":"wearable","pointers":["urn:1"]}"#)
            .with_body("https://peer.test/contents/w2", r#"{"type":"wearable"}"#)
            .with_body("https://peer.test/contents/emote1", r#"{"type":"emote"}"#)
            .with_status("https://peer.test/contents/gone", 404)
            .with_body("https://peer.test/contents/fresh", r#"{"type":"wearable"}"#)
            .with_body(
                "https://cdn.test/manifest/w1_windows.json",
                r#"{"version":"v24","files":["a_windows","a_mac","shared_windows"],"exitCode":0}"#,
            )
            .with_body(
                "https://cdn.test/manifest/w2_windows.json",
                r#"{"version":"v24","files":["shared_windows","b_windows"]}"#,
            )
            .with_body(
                "https://cdn.test/manifest/fresh_windows.json",
                r#"{"version":"v25","files":["c_windows"]}"#,
            )
            .with_body("https://cdn.test/v24/a_windows", "A")
            .with_body("https://cdn.test/v24/shared_windows", "S")
            .with_body("https://cdn.test/v24/b_windows", "B")
            .with_body("https://cdn.test/v25/c_windows", "C")
    }

    fn asset_calls(calls: &[String]) -> Vec<String> {
        let mut assets: Vec<_> = calls
            .iter()
            .filter(|url| url.starts_with("https://cdn.test/v"))
            .cloned()
            .collect();
        assets.sort();
        assets
    }

    #[tokio::test]
    async fn test_full_crawl() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = catalog();
        let calls = transport.calls();
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);

        let report = CrawlPipeline::new(&f, &cache, &config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.snapshot.as_deref(), Some("good"));
        assert_eq!(report.entity_ids, 5);
        assert_eq!(report.wearables, 3);
        assert!(!report.cancelled);

        // The shared asset was downloaded once; mac and v25 files never
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            asset_calls(&calls),
            vec![
                "https://cdn.test/v24/a_windows",
                "https://cdn.test/v24/b_windows",
                "https://cdn.test/v24/shared_windows",
            ]
        );
        assert_eq!(report.counters.total_downloaded, 3);
        assert_eq!(report.counters.cache_hits, 1);
        // emote1 (kind), gone (404) and fresh (version) were skipped;
        // only the 404 counts as a failure
        assert_eq!(report.counters.skipped, 3);
        assert_eq!(report.counters.failed_items, 1);

        assert_eq!(cache.len(), 3);
        assert!(cache.has(&Fingerprint::compute("v24", "shared_windows")));
        assert!(config.cache_file.exists());
        assert!(config
            .output_dir
            .join(Fingerprint::compute("v24", "a_windows").to_hex())
            .exists());
    }

    #[tokio::test]
    async fn test_cached_assets_are_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = catalog();
        let calls = transport.calls();
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);
        cache.remember(Fingerprint::compute("v24", "a_windows"), "https://cdn.test/v24/a_windows");

        let report = CrawlPipeline::new(&f, &cache, &config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        assert!(!calls.contains(&"https://cdn.test/v24/a_windows".to_string()));
        assert_eq!(report.counters.total_downloaded, 2);
    }

    #[tokio::test]
    async fn test_target_reached_saves_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            max_simultaneous_requests: 1,
            entity_batch_size: 1,
            target_download_count: 1,
            ..test_config(dir.path())
        };
        let transport = catalog();
        let calls = transport.calls();
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);
        let cancel = CancellationToken::new();

        let report = CrawlPipeline::new(&f, &cache, &config).run(&cancel).await.unwrap();

        assert!(cancel.is_cancelled());
        assert!(report.cancelled);
        assert_eq!(report.counters.total_downloaded, 1);

        // w1's other asset was waiting for the gate and never went out,
        // and w2 was never looked at
        let calls = calls.lock().unwrap().clone();
        assert_eq!(asset_calls(&calls).len(), 1);
        assert!(!calls.contains(&"https://peer.test/contents/w2".to_string()));

        let saved = ContentCache::new(&config.cache_file);
        assert_eq!(saved.load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_largest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            snapshot_entity_band: EntityBand { min: 1, max: 10 },
            ..test_config(dir.path())
        };
        let transport = catalog().with_body("https://peer.test/contents/huge", "[]");
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);

        let report = CrawlPipeline::new(&f, &cache, &config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.snapshot.as_deref(), Some("huge"));
        assert_eq!(report.entity_ids, 0);
    }

    #[tokio::test]
    async fn test_empty_listing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let f = fetcher(MockTransport::new().with_body(LISTING, "[]"), &config);
        let cache = ContentCache::new(&config.cache_file);

        let result = CrawlPipeline::new(&f, &cache, &config).run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(CrawlError::NoSnapshots)));
    }

    #[tokio::test]
    async fn test_unreachable_listing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let f = fetcher(MockTransport::new().with_status(LISTING, 503), &config);
        let cache = ContentCache::new(&config.cache_file);

        let result = CrawlPipeline::new(&f, &cache, &config).run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(CrawlError::ListingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_malformed_listing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let f = fetcher(MockTransport::new().with_body(LISTING, "<html>"), &config);
        let cache = ContentCache::new(&config.cache_file);

        let result = CrawlPipeline::new(&f, &cache, &config).run(&CancellationToken::new()).await;
        assert!(matches!(result, Err(CrawlError::ListingMalformed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = catalog();
        let calls = transport.calls();
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = CrawlPipeline::new(&f, &cache, &config).run(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(report.snapshot.is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_manifest_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = MockTransport::new()
            .with_body(LISTING, r#"[{"hash":"good","numberOfEntities":20000}]"#)
            .with_body("https://peer.test/contents/good", r#"{"entityId":"w1"}"#)
            .with_body("https://peer.test/contents/w1", r#"{"type":"wearable"}"#)
            .with_body("https://cdn.test/manifest/w1_windows.json", "<html>not json</html>");
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);

        let report = CrawlPipeline::new(&f, &cache, &config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        // Every request succeeded, the body was unusable
        assert_eq!(report.counters.failed, 0);
        assert_eq!(report.counters.failed_items, 1);
        assert_eq!(report.counters.skipped, 1);
        assert!(report.counters.any_failures());
    }

    #[tokio::test]
    async fn test_unreachable_snapshot_ends_crawl_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let transport = MockTransport::new()
            .with_body(LISTING, r#"[{"hash":"good","numberOfEntities":20000}]"#)
            .with_status("https://peer.test/contents/good", 500);
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);

        let report = CrawlPipeline::new(&f, &cache, &config)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.snapshot.as_deref(), Some("good"));
        assert_eq!(report.entity_ids, 0);
        assert!(!report.cancelled);
        assert_eq!(report.counters.failed, 1);
        assert!(report.counters.any_failures());
    }

    #[tokio::test]
    async fn test_cancellation_lets_dispatched_download_finish() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cancel = CancellationToken::new();
        // w1's asset is on the wire when w2's manifest trips cancellation;
        // w3 sits in the next batch
        let transport = MockTransport::new()
            .with_body(LISTING, r#"[{"hash":"good","numberOfEntities":20000}]"#)
            .with_body(
                "https://peer.test/contents/good",
                "{\"entityId\":\"w1\"}\n{\"entityId\":\"w2\"}\n{\"entityId\":\"w3\"}",
            )
            .with_body("https://peer.test/contents/w1", r#"{"type":"wearable"}"#)
            .with_body("https://peer.test/contents/w2", r#"{"type":"wearable"}"#)
            .with_body("https://peer.test/contents/w3", r#"{"type":"wearable"}"#)
            .with_body(
                "https://cdn.test/manifest/w1_windows.json",
                r#"{"version":"v24","files":["a_windows"]}"#,
            )
            .with_slow_body(
                "https://cdn.test/manifest/w2_windows.json",
                r#"{"version":"v24","files":["b_windows"]}"#,
                Duration::from_millis(50),
            )
            .with_slow_body("https://cdn.test/v24/a_windows", "A", Duration::from_millis(200))
            .with_body("https://cdn.test/v24/b_windows", "B")
            .cancel_on("https://cdn.test/manifest/w2_windows.json", cancel.clone());
        let calls = transport.calls();
        let f = fetcher(transport, &config);
        let cache = ContentCache::new(&config.cache_file);

        let report = CrawlPipeline::new(&f, &cache, &config).run(&cancel).await.unwrap();

        assert!(report.cancelled);
        let a = Fingerprint::compute("v24", "a_windows");
        assert!(cache.has(&a));
        assert_eq!(report.counters.total_downloaded, 1);

        // Nothing new went out after cancellation
        let calls = calls.lock().unwrap().clone();
        assert_eq!(asset_calls(&calls), vec!["https://cdn.test/v24/a_windows"]);
        assert!(!calls.contains(&"https://peer.test/contents/w3".to_string()));

        // The end-of-run save includes the late download
        let saved = ContentCache::new(&config.cache_file);
        assert_eq!(saved.load().await.unwrap(), 1);
        assert!(saved.has(&a));
    }
}
