// src/download/list.rs
// =============================================================================
// FlatListDownloader: fetches every URL of a plain list, batch by batch.
//
// How it works:
// 1. parse_url_list() turns the input text into distinct URLs
// 2. The URLs are cut into batches of `batch_size`
// 3. Every URL of a batch is dispatched, in input order
// 4. Only when the whole batch has finished does the next one start
//
// Two independent limits are in play:
// - The ThrottleGate (inside the Fetcher) caps requests in flight (15)
// - The batch size caps requests outstanding before we wait (100)
//
// Results are logged per URL. The aggregate lives in the shared Counters.
//
// Rust concepts:
// - slice::chunks: fixed-size batches without copying
// - futures::future::join_all: wait for a whole batch at once
// - HashSet::insert returns false for duplicates, handy for dedup
// =============================================================================

use std::collections::HashSet;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fetch::{Fetcher, Outcome, Request, Transport};

// Splits newline-delimited text into distinct URLs, first occurrence first.
// Lines are compared as-is; only a trailing '\r' is dropped, and empty
// lines are skipped.
pub fn parse_url_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListReport {
    /// Number of URLs dispatched in each batch, in order
    pub batches: Vec<usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct FlatListDownloader<'a, T: Transport> {
    fetcher: &'a Fetcher<T>,
    batch_size: usize,
    asset_host_prefix: String,
}

impl<'a, T: Transport> FlatListDownloader<'a, T> {
    pub fn new(fetcher: &'a Fetcher<T>, batch_size: usize, asset_host_prefix: impl Into<String>) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.max(1),
            asset_host_prefix: asset_host_prefix.into(),
        }
    }

    // Asset-host URLs are binary bundles, anything else is generic text
    fn request_for(&self, url: &str) -> Request {
        if url.starts_with(&self.asset_host_prefix) {
            Request::binary(url)
        } else {
            Request::text(url)
        }
    }

    pub async fn run(&self, urls: &[String], cancel: &CancellationToken) -> ListReport {
        let mut report = ListReport::default();

        for (index, batch) in urls.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!(batch = index, "cancelled, not dispatching further batches");
                break;
            }

            info!(batch = index, size = batch.len(), "dispatching batch");
            report.batches.push(batch.len());

            let fetches = batch.iter().map(|url| async move {
                let outcome = self.fetcher.fetch(self.request_for(url), cancel).await;
                (url, outcome)
            });

            for (url, outcome) in join_all(fetches).await {
                match outcome {
                    Outcome::Success(payload) => {
                        info!(url = %url, bytes = payload.byte_len(), "request complete");
                        report.succeeded += 1;
                    }
                    Outcome::Cancelled => report.cancelled += 1,
                    other => {
                        warn!(url = %url, outcome = ?other, "request did not succeed");
                        report.failed += 1;
                    }
                }
            }

            info!(
                batch = index,
                completed = self.fetcher.counters().snapshot().completed,
                "batch complete"
            );
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "flat list finished"
        );
        report
    }
}

// -----------------------------------------------------------------------------
// BEGINNER NOTES:
//
// 1. What does join_all do?
//    - Takes many futures and completes when all of them have completed
//    - The futures run interleaved on the current task, not in parallel
//    - Results come back in the same order as the input
//
// 2. Why `async move` inside the map?
//    - Each future needs its own copy of `url` (a &String)
//    - `move` copies the references into the future; nothing is cloned
//
// 3. Why does the batch size not limit concurrency?
//    - All URLs of a batch are started at once
//    - Each one then waits at the ThrottleGate inside Fetcher::fetch
//    - So the gate decides how many actually hit the network
// -----------------------------------------------------------------------------
