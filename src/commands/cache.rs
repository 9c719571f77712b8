//! Cache administration command flow.
//!
//! Exit-code contract: 0 on success, 1 on validation failure (for example
//! a hit rate below the CI threshold), 2 on fatal error.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::LayeredCache;
use crate::cli::CacheArgs;
use crate::logfmt::{self, Status};

/// Exit code for a passed run.
pub const EXIT_OK: i32 = 0;

/// Exit code for a failed validation (health gate).
pub const EXIT_VALIDATION: i32 = 1;

/// Exit code for a fatal error.
pub const EXIT_FATAL: i32 = 2;

/// Runs the cache command; returns the process exit code.
pub async fn run_cache_command(args: &CacheArgs, cache: &Arc<LayeredCache>) -> i32 {
    if args.monitor {
        return run_monitor(args, cache).await;
    }

    let mut exit = EXIT_OK;

    if args.stats || args.health_check {
        match cache.report().await {
            Ok(report) => {
                println!(
                    "hot tier:  enabled={} reachable={} hits={} misses={} hit_rate={:.2}",
                    report.hot_enabled,
                    report.hot_reachable,
                    report.hot_hits,
                    report.hot_misses,
                    report.hot_hit_rate
                );
                println!(
                    "warm tier: parsed_entries={} parsed_bytes={} pdf_files={} pdf_bytes={}",
                    report.warm.parsed_entries,
                    report.warm.parsed_bytes,
                    report.warm.pdf_files,
                    report.warm.pdf_bytes
                );

                if args.health_check {
                    if report.hot_enabled && !report.hot_reachable {
                        logfmt::log_event(Status::Fail, "cache", "hot tier unreachable", &[]);
                        exit = EXIT_VALIDATION;
                    }
                    if let Some(threshold) = args.min_hit_rate
                        && report.hot_hit_rate < threshold
                    {
                        logfmt::log_event(
                            Status::Fail,
                            "cache",
                            "hit rate below threshold",
                            &[
                                ("hit_rate", &format!("{:.2}", report.hot_hit_rate)),
                                ("threshold", &format!("{threshold:.2}")),
                            ],
                        );
                        exit = EXIT_VALIDATION;
                    }
                }
            }
            Err(error) => {
                logfmt::log_event(
                    Status::Fail,
                    "cache",
                    "stats collection failed",
                    &[("error", &error.to_string())],
                );
                return EXIT_FATAL;
            }
        }
    }

    if args.clear_redis {
        let pattern = args.pattern.as_deref().unwrap_or("*");
        if args.dry_run || !args.execute {
            println!("[dry-run] would delete hot-tier keys matching '{pattern}'");
        } else {
            let removed = cache.invalidate(pattern).await;
            println!("deleted {removed} hot-tier keys matching '{pattern}'");
        }
    }

    if args.clear_soft {
        // Destructive unless --execute is given.
        let dry_run = args.dry_run || !args.execute;
        match cache.soft().cleanup(args.max_age_days, dry_run).await {
            Ok(report) => {
                let verb = if report.dry_run { "would delete" } else { "deleted" };
                println!(
                    "SOFT cleanup: examined={} {verb}={} bytes={}",
                    report.examined, report.deleted, report.bytes_freed
                );
            }
            Err(error) => {
                logfmt::log_event(
                    Status::Fail,
                    "cache",
                    "SOFT cleanup failed",
                    &[("error", &error.to_string())],
                );
                return EXIT_FATAL;
            }
        }
    }

    exit
}

/// Samples stats on an interval until interrupted.
async fn run_monitor(args: &CacheArgs, cache: &Arc<LayeredCache>) -> i32 {
    let interval = Duration::from_secs(args.interval.max(1));
    loop {
        match cache.report().await {
            Ok(report) => println!(
                "hot: reachable={} hit_rate={:.2} | warm: parsed={} pdfs={}",
                report.hot_reachable,
                report.hot_hit_rate,
                report.warm.parsed_entries,
                report.warm.pdf_files
            ),
            Err(error) => {
                logfmt::log_event(
                    Status::Fail,
                    "cache",
                    "monitor sample failed",
                    &[("error", &error.to_string())],
                );
                return EXIT_FATAL;
            }
        }
        tokio::time::sleep(interval).await;
    }
}
