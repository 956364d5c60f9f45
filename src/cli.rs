// src/cli.rs
// =============================================================================
// This file defines our command-line interface using the `clap` crate.
//
// Two subcommands, one per pipeline:
// - list:  download every URL of a text file, batch by batch
// - crawl: walk the catalog snapshot and download wearable asset bundles
//
// Every tuning flag is optional. When present it overrides the value from
// the config file (or the built-in default), see Commands::apply.
//
// Rust concepts:
// - Derive macros: clap generates the parser from the struct definitions
// - Option<T>: "flag not given" is None, so we know what to override
// =============================================================================

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "wearable-harvester",
    version,
    about = "Crawl a content catalog and download asset bundles with bounded concurrency",
    long_about = "wearable-harvester resolves catalog snapshots into entities, manifests and asset \
                  bundles, and downloads the bundles it has not fetched before. It can also fetch \
                  a plain list of URLs with the same concurrency limits."
)]
pub struct Cli {
    /// TOML configuration file (defaults apply for anything it leaves out)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every URL listed in a newline-delimited file
    ///
    /// Example: wearable-harvester list urls.txt --batch-size 50
    List {
        /// File with one URL per line; duplicate lines are fetched once
        urls_file: PathBuf,

        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Maximum requests in flight at once
        #[arg(long)]
        max_requests: Option<usize>,

        /// URLs dispatched before waiting for them all to finish
        #[arg(long)]
        batch_size: Option<usize>,

        /// URLs starting with this prefix are fetched as binary bundles
        #[arg(long)]
        asset_host_prefix: Option<String>,
    },

    /// Crawl the catalog and download wearable asset bundles
    ///
    /// Example: wearable-harvester crawl --target 500 --output-dir bundles
    Crawl {
        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Maximum requests in flight at once
        #[arg(long)]
        max_requests: Option<usize>,

        /// Entities processed together before waiting for them all
        #[arg(long)]
        entity_batch_size: Option<usize>,

        /// Stop after this many asset downloads
        #[arg(long)]
        target: Option<usize>,

        /// Lower bound of the preferred snapshot size
        #[arg(long)]
        band_min: Option<u64>,

        /// Upper bound of the preferred snapshot size
        #[arg(long)]
        band_max: Option<u64>,

        /// Skip manifests whose version number is at or above this
        #[arg(long)]
        version_cutoff: Option<u32>,

        /// Platform suffix of the files to download (e.g. windows, mac)
        #[arg(long)]
        platform: Option<String>,

        /// Directory for downloaded bundles
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Cache file recording what has been downloaded
        #[arg(long)]
        cache_file: Option<PathBuf>,

        /// Load the cache file before crawling, skipping bundles it lists
        #[arg(long)]
        resume: bool,
    },
}

impl Commands {
    /// Overrides config values with the flags that were given
    pub fn apply(&self, config: &mut Config) {
        match self {
            Commands::List {
                max_requests,
                batch_size,
                asset_host_prefix,
                ..
            } => {
                set(&mut config.max_simultaneous_requests, *max_requests);
                set(&mut config.flat_batch_size, *batch_size);
                set(&mut config.asset_host_prefix, asset_host_prefix.clone());
            }
            Commands::Crawl {
                max_requests,
                entity_batch_size,
                target,
                band_min,
                band_max,
                version_cutoff,
                platform,
                output_dir,
                cache_file,
                resume,
                ..
            } => {
                set(&mut config.max_simultaneous_requests, *max_requests);
                set(&mut config.entity_batch_size, *entity_batch_size);
                set(&mut config.target_download_count, *target);
                set(&mut config.snapshot_entity_band.min, *band_min);
                set(&mut config.snapshot_entity_band.max, *band_max);
                set(&mut config.manifest_version_cutoff, *version_cutoff);
                set(&mut config.platform_suffix_filter, platform.clone());
                set(&mut config.output_dir, output_dir.clone());
                set(&mut config.cache_file, cache_file.clone());
                if *resume {
                    config.resume_cache = true;
                }
            }
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
