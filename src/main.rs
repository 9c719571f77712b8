//! CLI entry point for the geolit tool.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use geolit_core::cache::{HotCache, LayeredCache, SoftCache, WarmStore};
use geolit_core::cli::{Args, Command};
use geolit_core::commands::{EXIT_FATAL, run_cache_command, run_enrich_command};
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let code = match &args.command {
        Command::Enrich(enrich) => match run_enrich_command(&args, enrich).await {
            Ok(code) => code,
            Err(error) => {
                eprintln!("fatal: {error:#}");
                EXIT_FATAL
            }
        },
        Command::Cache(cache_args) => {
            let cache = Arc::new(LayeredCache::new(
                Arc::new(HotCache::connect(args.redis_url.as_deref()).await),
                Arc::new(WarmStore::new(&args.storage_root)),
                Arc::new(SoftCache::new(&args.storage_root)),
            ));
            run_cache_command(cache_args, &cache).await
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(2))
}
