// src/main.rs
// =============================================================================
// This is the entry point of our CLI application.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Set up logging and merge the configuration layers
// 3. Dispatch to the list or crawl handler
// 4. Print a summary and exit with a proper code
//    (0 = everything succeeded, 1 = some downloads failed, 2 = error)
//
// Ctrl-C asks both pipelines to stop: requests already on the wire finish,
// nothing new is started. The crawl saves its cache before stopping.
// =============================================================================

mod cache;
mod cli;
mod config;
mod crawl;
mod download;
mod error;
mod fetch;
mod logging;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cache::ContentCache;
use cli::{Cli, Commands};
use config::Config;
use crawl::CrawlPipeline;
use download::{parse_url_list, FlatListDownloader, ListReport};
use fetch::{ArtifactStore, CounterSnapshot, Counters, Fetcher, ReqwestTransport, ThrottleGate};

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format, cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    cli.command.apply(&mut config);
    config.validate()?;

    match &cli.command {
        Commands::List { urls_file, json, .. } => handle_list(urls_file, *json, &config).await,
        Commands::Crawl { json, .. } => handle_crawl(*json, &config).await,
    }
}

fn build_fetcher(config: &Config) -> Result<Fetcher<ReqwestTransport>> {
    let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))?;
    Ok(Fetcher::new(
        transport,
        ThrottleGate::new(config.max_simultaneous_requests),
        Arc::new(Counters::new()),
        ArtifactStore::new(&config.output_dir),
    ))
}

// Handles the 'list' subcommand
async fn handle_list(urls_file: &Path, json: bool, config: &Config) -> Result<i32> {
    let text = tokio::fs::read_to_string(urls_file)
        .await
        .with_context(|| format!("Failed to read URL list {}", urls_file.display()))?;
    let urls = parse_url_list(&text);
    info!(file = %urls_file.display(), urls = urls.len(), "URL list loaded");

    let fetcher = build_fetcher(config)?;
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone(), None));

    let report = FlatListDownloader::new(&fetcher, config.flat_batch_size, config.asset_host_prefix.as_str())
        .run(&urls, &cancel)
        .await;
    watcher.abort();

    let summary = ListSummary {
        urls: urls.len(),
        report,
        counters: fetcher.counters().snapshot(),
        peak_in_flight: fetcher.gate().peak(),
    };
    print_summary(&summary, json, |s| {
        vec![
            ("Distinct URLs", s.urls.to_string()),
            ("Batches", format!("{:?}", s.report.batches)),
            ("Succeeded", s.report.succeeded.to_string()),
            ("Failed", s.report.failed.to_string()),
            ("Cancelled", s.report.cancelled.to_string()),
            ("Peak in flight", s.peak_in_flight.to_string()),
        ]
    })?;

    Ok(if summary.report.failed > 0 { 1 } else { 0 })
}

// Handles the 'crawl' subcommand
async fn handle_crawl(json: bool, config: &Config) -> Result<i32> {
    let cache = Arc::new(ContentCache::new(&config.cache_file));
    if config.resume_cache {
        cache.load().await?;
    }

    let fetcher = build_fetcher(config)?;
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone(), Some(Arc::clone(&cache))));

    let result = CrawlPipeline::new(&fetcher, &cache, config).run(&cancel).await;
    watcher.abort();
    let report = result?;

    print_summary(&report, json, |r| {
        vec![
            ("Snapshot", r.snapshot.clone().unwrap_or_else(|| "-".to_string())),
            ("Entity ids", r.entity_ids.to_string()),
            ("Wearables", r.wearables.to_string()),
            ("Downloaded", r.counters.total_downloaded.to_string()),
            ("Cache hits", r.counters.cache_hits.to_string()),
            ("Failed requests", r.counters.failed.to_string()),
            ("Failed items", r.counters.failed_items.to_string()),
            ("Skipped entities", r.counters.skipped.to_string()),
            ("Cache entries", r.cached_entries.to_string()),
            ("Peak in flight", r.counters.peak_active.to_string()),
            ("Stopped early", r.cancelled.to_string()),
        ]
    })?;

    Ok(if report.counters.any_failures() { 1 } else { 0 })
}

// Waits for Ctrl-C, saves the cache (if any), then cancels
async fn cancel_on_ctrl_c(cancel: CancellationToken, cache: Option<Arc<ContentCache>>) {
    cancel_on_signal(tokio::signal::ctrl_c(), cancel, cache).await;
}

async fn cancel_on_signal(
    signal: impl Future<Output = std::io::Result<()>>,
    cancel: CancellationToken,
    cache: Option<Arc<ContentCache>>,
) {
    if signal.await.is_err() {
        return;
    }
    info!("interrupt received, letting in-flight requests finish");
    if let Some(cache) = cache {
        if let Err(e) = cache.save().await {
            warn!(error = %e, "failed to save cache");
        }
    }
    cancel.cancel();
}

#[derive(Debug, Serialize)]
struct ListSummary {
    urls: usize,
    #[serde(flatten)]
    report: ListReport,
    counters: CounterSnapshot,
    peak_in_flight: usize,
}

// Prints a summary either as JSON or as a two-column table
fn print_summary<T: Serialize>(
    summary: &T,
    json: bool,
    rows: impl Fn(&T) -> Vec<(&'static str, String)>,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!("{:<20} {:<30}", "METRIC", "VALUE");
    println!("{}", "=".repeat(50));
    for (name, value) in rows(summary) {
        println!("{:<20} {:<30}", name, value);
    }
    println!();
    Ok(())
}
