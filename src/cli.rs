//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Discover, download, and parse the scientific literature behind GEO
/// datasets.
#[derive(Parser, Debug)]
#[command(name = "geolit")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Storage root for PDFs, parsed content, and the registry
    #[arg(long, default_value = "./geolit-data", global = true)]
    pub storage_root: PathBuf,

    /// Redis URL for the hot cache tier (omit to run warm-only)
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enrich one or more GEO datasets through the pipeline
    Enrich(EnrichArgs),

    /// Inspect and maintain the cache tiers
    Cache(CacheArgs),
}

#[derive(clap::Args, Debug)]
pub struct EnrichArgs {
    /// GEO accessions to enrich (e.g. GSE52564)
    #[arg(required = true)]
    pub accessions: Vec<String>,

    /// Target completeness level
    #[arg(long, default_value = "fully_enriched",
          value_parser = ["metadata_only", "with_citations", "with_urls", "with_pdfs", "fully_enriched"])]
    pub level: String,

    /// Maximum citing papers processed per dataset
    #[arg(long, default_value_t = 10)]
    pub max_papers: usize,

    /// Maximum concurrent PDF downloads (1-100)
    #[arg(short = 'c', long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Contact email sent to NCBI and Unpaywall
    #[arg(long, default_value = "geolit@example.com")]
    pub contact_email: String,

    /// Enable institutional proxy candidates
    #[arg(long)]
    pub institutional: bool,

    /// Institutional proxy prefix (EZproxy-style)
    #[arg(long)]
    pub proxy_prefix: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CacheArgs {
    /// Print hit rates, entry counts, and byte totals per tier
    #[arg(long)]
    pub stats: bool,

    /// Exercise one round-trip per tier and report reachability
    #[arg(long)]
    pub health_check: bool,

    /// Minimum hot-tier hit rate for --health-check to pass (CI gate)
    #[arg(long)]
    pub min_hit_rate: Option<f64>,

    /// Delete hot-tier keys (all, or those matching --pattern)
    #[arg(long)]
    pub clear_redis: bool,

    /// Key pattern for --clear-redis (e.g. 'geo:GSE189*')
    #[arg(long)]
    pub pattern: Option<String>,

    /// Delete SOFT bundles older than --max-age-days
    #[arg(long)]
    pub clear_soft: bool,

    /// Age threshold in days for --clear-soft
    #[arg(long, default_value_t = 90)]
    pub max_age_days: i64,

    /// Sample cache statistics repeatedly
    #[arg(long)]
    pub monitor: bool,

    /// Sampling interval in seconds for --monitor
    #[arg(long, default_value_t = 10)]
    pub interval: u64,

    /// Preview destructive operations without executing them
    #[arg(long, conflicts_with = "execute")]
    pub dry_run: bool,

    /// Execute destructive operations
    #[arg(long)]
    pub execute: bool,
}
