//! Enrichment command flow: wires the full pipeline and drives a request.

use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::info;

use crate::cache::{HotCache, LayeredCache, SoftCache, WarmStore};
use crate::cli::{Args, EnrichArgs};
use crate::config::EnrichConfig;
use crate::download::{DownloadManager, PdfFetcher};
use crate::fulltext::PmcBlocklist;
use crate::pipeline::{Coordinator, DatasetSeed, EnrichRequest, EnrichmentService};
use crate::registry::{CompletenessLevel, Registry};
use crate::source::SourceRegistry;

/// Builds the immutable config from CLI arguments.
fn config_from_args(args: &Args, enrich: &EnrichArgs) -> EnrichConfig {
    EnrichConfig {
        storage_root: args.storage_root.clone(),
        redis_url: args.redis_url.clone(),
        ncbi_contact_email: enrich.contact_email.clone(),
        unpaywall_email: enrich.contact_email.clone(),
        enable_institutional: enrich.institutional,
        institutional_proxy_prefix: enrich.proxy_prefix.clone(),
        max_concurrent_downloads: usize::from(enrich.concurrency),
        max_papers_per_dataset: enrich.max_papers,
        ..EnrichConfig::default()
    }
}

/// Runs the enrich command; returns the process exit code.
///
/// # Errors
///
/// Returns an error for startup failures (database, storage root); dataset
/// failures surface in the printed snapshots instead.
pub async fn run_enrich_command(args: &Args, enrich: &EnrichArgs) -> Result<i32> {
    let config = config_from_args(args, enrich);

    let desired: CompletenessLevel = enrich
        .level
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating registry directory {}", parent.display()))?;
    }
    let registry = Registry::open(&db_path)
        .await
        .context("opening registry database")?;

    let cache = Arc::new(LayeredCache::new(
        Arc::new(HotCache::connect(config.redis_url.as_deref()).await),
        Arc::new(WarmStore::new(&config.storage_root)),
        Arc::new(SoftCache::new(&config.storage_root)),
    ));

    let sources = Arc::new(SourceRegistry::from_config(&config));
    let pmc_blocklist = Arc::new(PmcBlocklist::new());
    let fetcher = PdfFetcher::new(
        crate::source::source_user_agent(&config.ncbi_contact_email),
        config.request_timeout(),
    );
    let downloads = DownloadManager::new(
        fetcher,
        Arc::new(Semaphore::new(config.max_concurrent_downloads)),
        Arc::clone(&pmc_blocklist),
        config.enable_institutional,
    );

    let coordinator = Arc::new(Coordinator::new(
        config,
        registry,
        sources,
        Arc::clone(&cache),
        downloads,
        pmc_blocklist,
    ));
    let service = EnrichmentService::new(coordinator);

    let request = EnrichRequest {
        datasets: enrich
            .accessions
            .iter()
            .map(DatasetSeed::bare)
            .collect(),
        desired_level: desired,
        max_papers_per_dataset: Some(enrich.max_papers),
    };

    let bar = ProgressBar::new(request.datasets.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (sender, mut receiver) =
        tokio::sync::mpsc::unbounded_channel::<crate::pipeline::ProgressEvent>();
    let bar_task = {
        let bar = bar.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                bar.inc(1);
                bar.set_message(format!("{} -> {}", event.geo_id, event.level));
            }
        })
    };

    let response = service.enrich(&request, Some(sender)).await?;
    bar_task.abort();
    bar.finish_and_clear();

    let mut any_failed = false;
    for snapshot in &response.datasets {
        info!(
            geo_id = %snapshot.geo_id,
            completeness = %snapshot.completeness,
            fulltext = %snapshot.fulltext_status,
            publications = snapshot.publications.len(),
            "dataset finished"
        );
        println!(
            "{}: {} ({} publications, {} full texts, {} status, success rate {:.0}%)",
            snapshot.geo_id,
            snapshot.completeness,
            snapshot.publications.len(),
            snapshot.fulltext_count,
            snapshot.fulltext_status,
            snapshot.statistics.success_rate * 100.0
        );
        if snapshot.completeness < desired {
            any_failed = true;
        }
    }

    Ok(i32::from(any_failed))
}
