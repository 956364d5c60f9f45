// src/fetch/counters.rs
// =============================================================================
// Run-wide counters: how many requests were attempted, how many are in
// flight, how many assets were downloaded, and so on.
//
// One Counters value belongs to one pipeline run and is shared by Arc with
// the Fetcher and the pipeline stages. Nothing here is a global static.
//
// The counters are diagnostics and feed the termination policy
// (total_downloaded vs. the download target). They never gate admission;
// the ThrottleGate does that.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Counters {
    attempted: AtomicUsize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    total_downloaded: AtomicUsize,
    cache_hits: AtomicUsize,
    skipped: AtomicUsize,
    failed_items: AtomicUsize,
}

// Point-in-time copy of the counters, printable as a table or JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub attempted: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active: usize,
    pub peak_active: usize,
    pub total_downloaded: usize,
    pub cache_hits: usize,
    pub skipped: usize,
    /// Entities or manifests dropped because of an error, not by policy
    pub failed_items: usize,
}

impl CounterSnapshot {
    /// True if any request or item ended in an error
    pub fn any_failures(&self) -> bool {
        self.failed > 0 || self.failed_items > 0
    }
}

// Marks one request as active for as long as it lives
pub struct ActiveGuard<'a> {
    counters: &'a Counters,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        for counter in [
            &self.attempted,
            &self.completed,
            &self.succeeded,
            &self.failed,
            &self.cancelled,
            &self.active,
            &self.peak_active,
            &self.total_downloaded,
            &self.cache_hits,
            &self.skipped,
            &self.failed_items,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Counts a request as attempted and active until the guard drops.
    pub fn start_request(&self) -> ActiveGuard<'_> {
        self.attempted.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        ActiveGuard { counters: self }
    }

    pub fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_item_failure(&self) {
        self.failed_items.fetch_add(1, Ordering::SeqCst);
    }

    /// Adds one downloaded asset and returns the new total.
    pub fn record_download(&self) -> usize {
        self.total_downloaded.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            attempted: self.attempted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
            total_downloaded: self.total_downloaded.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed_items: self.failed_items.load(Ordering::SeqCst),
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}
