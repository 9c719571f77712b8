//! The pipeline coordinator: the per-dataset state machine over
//! P1 (citations) -> P2 (urls) -> P3 (pdfs) -> P4 (parse).
//!
//! Every stage transition persists before the next stage executes, so an
//! interrupted run resumes from the registry without duplicate external
//! work. Stage retries follow the smart-reenrichment rule: run when never
//! attempted, or when the last failure is older than the backoff rung for
//! its retry count; a stage that exhausts its retry budget is poisoned and
//! the dataset's completeness freezes at the highest achieved level.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::{DatasetManifest, LayeredCache, ManifestEntry, StoredParsed};
use crate::config::EnrichConfig;
use crate::discovery::CitationDiscovery;
use crate::download::DownloadManager;
use crate::extract;
use crate::fulltext::{FullTextManager, PmcBlocklist};
use crate::ident::GeoAccession;
use crate::logfmt::{self, Status};
use crate::registry::{
    CompletenessLevel, DatasetMetadata, Registry, RegistryError, Relationship, Stage, SuccessInfo,
};
use crate::source::{PubRef, SourceError, SourceRegistry, UrlCandidate};

/// Per-publication fan-out bound within one stage. For the parse stage
/// this is also the extraction worker-pool bound.
const STAGE_FANOUT: usize = 10;

/// Per-publication result of the parse fan-out.
enum ParseOutcome {
    AlreadyParsed,
    NoPdf,
    Parsed(Box<crate::extract::ParsedContent>),
    Failed(String),
    RegistryError(String),
}

/// Coordinator errors surfaced to the boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid GEO accession: {0}")]
    InvalidAccession(String),
}

/// Why a required stage did not run in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSkip {
    /// The backoff window for the stage's retry count has not elapsed.
    BackoffDeferred {
        stage: Stage,
        not_before: DateTime<Utc>,
    },
    /// The stage exhausted its retry budget.
    MaxRetriesExceeded { stage: Stage },
}

/// Result of one coordinator pass over a dataset.
#[derive(Debug, Clone)]
pub struct EnrichOutcome {
    pub geo_id: String,
    pub level: CompletenessLevel,
    /// Stages that ran in this pass.
    pub stages_run: Vec<Stage>,
    /// Why the climb stopped early, when it did.
    pub stopped: Option<StageSkip>,
}

/// Seed input for one dataset; extra fields are hints.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DatasetSeed {
    pub geo_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub pubmed_ids: Vec<String>,
}

impl DatasetSeed {
    /// A seed carrying only the accession.
    #[must_use]
    pub fn bare(geo_id: impl Into<String>) -> Self {
        Self {
            geo_id: geo_id.into(),
            ..Self::default()
        }
    }
}

/// The coordinator.
pub struct Coordinator {
    config: EnrichConfig,
    registry: Registry,
    sources: Arc<SourceRegistry>,
    discovery: CitationDiscovery,
    fulltext: FullTextManager,
    downloads: DownloadManager,
    cache: Arc<LayeredCache>,
    pmc_blocklist: Arc<PmcBlocklist>,
}

impl Coordinator {
    /// Wires a coordinator from explicit components.
    #[must_use]
    pub fn new(
        config: EnrichConfig,
        registry: Registry,
        sources: Arc<SourceRegistry>,
        cache: Arc<LayeredCache>,
        downloads: DownloadManager,
        pmc_blocklist: Arc<PmcBlocklist>,
    ) -> Self {
        let discovery = CitationDiscovery::new(Arc::clone(&sources), config.discovery_timeout());
        let fulltext = FullTextManager::new(
            Arc::clone(&sources),
            Arc::clone(&pmc_blocklist),
            config.p2_batch_timeout(),
            config.enable_institutional,
        );
        Self {
            config,
            registry,
            sources,
            discovery,
            fulltext,
            downloads,
            cache,
            pmc_blocklist,
        }
    }

    /// The registry this coordinator persists through.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The configured per-dataset budget.
    #[must_use]
    pub fn dataset_timeout(&self) -> std::time::Duration {
        self.config.dataset_timeout()
    }

    /// Drives one dataset toward `desired`, persisting every transition.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only for invalid input or registry
    /// failures; stage-level trouble is absorbed into job state.
    #[instrument(skip(self, seed), fields(geo_id = %seed.geo_id, desired = %desired))]
    pub async fn enrich_dataset(
        &self,
        seed: &DatasetSeed,
        desired: CompletenessLevel,
    ) -> Result<EnrichOutcome, PipelineError> {
        let accession = GeoAccession::parse(&seed.geo_id)
            .map_err(|_| PipelineError::InvalidAccession(seed.geo_id.clone()))?;
        let geo_id = accession.as_str().to_string();

        self.seed_metadata(&geo_id, seed).await?;

        let mut level = self.registry.completeness(&geo_id).await?;
        let mut stages_run = Vec::new();
        let mut stopped = None;

        for stage in Stage::required(level, desired) {
            if let Some(skip) = self.check_reenrichment(&geo_id, stage).await? {
                logfmt::log_event(
                    Status::Skip,
                    "coordinator",
                    "stage skipped",
                    &[("geo_id", &geo_id), ("stage", stage.as_str())],
                );
                stopped = Some(skip);
                break;
            }

            // A stage that outlives its budget is a transient failure with
            // normal backoff.
            let budget = self.config.stage_timeout();
            let result = match stage {
                Stage::Citations => {
                    tokio::time::timeout(budget, self.run_citations(&geo_id)).await
                }
                Stage::Urls => tokio::time::timeout(budget, self.run_urls(&geo_id)).await,
                Stage::Pdfs => tokio::time::timeout(budget, self.run_pdfs(&geo_id)).await,
                Stage::Parse => tokio::time::timeout(budget, self.run_parse(&geo_id)).await,
            }
            .unwrap_or_else(|_elapsed| {
                Err(format!("stage exceeded its {}s budget", budget.as_secs()))
            });
            stages_run.push(stage);

            match result {
                Ok(()) => {
                    self.registry.record_job_success(&geo_id, stage).await?;
                    level = self
                        .registry
                        .update_completeness(&geo_id, stage.level_on_success())
                        .await?;
                    logfmt::log_event(
                        Status::Ok,
                        "coordinator",
                        "stage complete",
                        &[
                            ("geo_id", &geo_id),
                            ("stage", stage.as_str()),
                            ("level", level.as_str()),
                        ],
                    );
                    self.cache.invalidate(&format!("geo:{geo_id}*")).await;
                }
                Err(reason) => {
                    let job = self
                        .registry
                        .record_job_failure(&geo_id, stage, &reason, self.config.max_retries)
                        .await?;
                    logfmt::log_event(
                        Status::Fail,
                        "coordinator",
                        "stage failed",
                        &[
                            ("geo_id", &geo_id),
                            ("stage", stage.as_str()),
                            ("retry_count", &job.retry_count.to_string()),
                            ("reason", &reason),
                        ],
                    );
                    // Downstream stages depend on this one; stop the climb.
                    stopped = Some(if job.status == "poisoned" {
                        StageSkip::MaxRetriesExceeded { stage }
                    } else {
                        // Backoff is indexed by the retry count already
                        // consumed, matching the re-entry check.
                        let consumed = u32::try_from((job.retry_count - 1).max(0)).unwrap_or(0);
                        StageSkip::BackoffDeferred {
                            stage,
                            not_before: Utc::now() + self.config.backoff_for_retry(consumed),
                        }
                    });
                    break;
                }
            }
        }

        self.write_manifest(&geo_id).await;

        Ok(EnrichOutcome {
            geo_id,
            level,
            stages_run,
            stopped,
        })
    }

    /// Applies the smart-reenrichment rule for one stage.
    ///
    /// Returns `Some(skip)` when the stage must not run in this pass.
    async fn check_reenrichment(
        &self,
        geo_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSkip>, PipelineError> {
        let Some(job) = self.registry.job_state(geo_id, stage).await? else {
            return Ok(None); // never attempted
        };

        if job.status == "poisoned" {
            return Ok(Some(StageSkip::MaxRetriesExceeded { stage }));
        }
        if job.status != "failed" {
            return Ok(None);
        }

        let retry_count = u32::try_from(job.retry_count.max(0)).unwrap_or(0);
        if retry_count >= self.config.max_retries {
            return Ok(Some(StageSkip::MaxRetriesExceeded { stage }));
        }

        let Some(last_attempt) = job
            .last_attempt_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
        else {
            return Ok(None);
        };

        // Backoff is indexed by the retry count already consumed.
        let not_before = last_attempt + self.config.backoff_for_retry(retry_count.saturating_sub(1));
        if Utc::now() < not_before {
            return Ok(Some(StageSkip::BackoffDeferred { stage, not_before }));
        }
        Ok(None)
    }

    /// Seeds the dataset row from the request hints, backfilling missing
    /// metadata (organism included) from the GEO E-Summary record.
    async fn seed_metadata(&self, geo_id: &str, seed: &DatasetSeed) -> Result<(), PipelineError> {
        let existing = self.registry.get_dataset(geo_id).await?;
        let needs_backfill = existing
            .as_ref()
            .is_none_or(|d| d.organism.is_none() || d.title.is_none() || d.pubmed_ids().is_empty());

        let mut metadata = DatasetMetadata {
            title: seed.title.clone(),
            summary: seed.summary.clone(),
            organism: seed.organism.clone(),
            pubmed_ids: seed.pubmed_ids.clone(),
            ..DatasetMetadata::default()
        };

        if needs_backfill {
            match self.sources.pubmed().fetch_geo_summary(geo_id).await {
                Ok(summary) => {
                    metadata.title = metadata.title.or(summary.title);
                    metadata.summary = metadata.summary.or(summary.summary);
                    metadata.organism = metadata.organism.or(summary.organism);
                    metadata.platform = summary.platform;
                    metadata.sample_count = summary.sample_count;
                    metadata.publication_date = summary.publication_date;
                    if metadata.pubmed_ids.is_empty() {
                        metadata.pubmed_ids = summary.pubmed_ids;
                    }
                }
                Err(SourceError::NotFound) => {
                    debug!(geo_id, "no GEO summary record; proceeding with seed hints");
                }
                Err(error) => {
                    warn!(geo_id, error = %error, "GEO summary backfill failed; proceeding with seed hints");
                }
            }
        }

        self.registry.upsert_dataset(geo_id, &metadata).await?;
        Ok(())
    }

    /// P1: discover, persist, and link publications.
    async fn run_citations(&self, geo_id: &str) -> Result<(), String> {
        let dataset = self
            .registry
            .get_dataset(geo_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("dataset {geo_id} vanished"))?;

        let pmids = dataset.pubmed_ids();
        let result = self.discovery.discover(&pmids).await;

        if result.original.is_empty() && result.citing.is_empty() {
            return Err("citation discovery produced no publications".to_string());
        }

        for publication in &result.original {
            let pub_key = self
                .registry
                .upsert_publication(publication)
                .await
                .map_err(|e| e.to_string())?;
            self.registry
                .link(geo_id, &pub_key, Relationship::Original, Some("pubmed_ids"))
                .await
                .map_err(|e| e.to_string())?;
        }
        let citing = result
            .citing
            .iter()
            .take(self.config.max_papers_per_dataset);
        for publication in citing {
            let pub_key = self
                .registry
                .upsert_publication(publication)
                .await
                .map_err(|e| e.to_string())?;
            self.registry
                .link(
                    geo_id,
                    &pub_key,
                    Relationship::Citing,
                    Some(&publication.discovery_source),
                )
                .await
                .map_err(|e| e.to_string())?;
        }

        if let Ok(json) = serde_json::to_string(&result) {
            self.cache.hot().set(&format!("discovery:{geo_id}"), &json).await;
        }

        if result.citing.is_empty() {
            // Originals persisted, but an empty citing set is retried on
            // the backoff schedule.
            return Err("no citing publications found".to_string());
        }
        Ok(())
    }

    /// P2: collect candidates for every linked publication.
    async fn run_urls(&self, geo_id: &str) -> Result<(), String> {
        let publications = self
            .registry
            .publications_for(geo_id)
            .await
            .map_err(|e| e.to_string())?;
        if publications.is_empty() {
            return Err("no publications to collect URLs for".to_string());
        }

        let mut any_candidates = false;
        let mut tasks = futures_util::stream::iter(publications.into_iter().map(
            |(publication, _relationship)| {
                let fulltext = &self.fulltext;
                let registry = &self.registry;
                async move {
                    let pub_key = publication.pub_key.clone();
                    let cached: Vec<UrlCandidate> = registry
                        .candidates_for(&pub_key, false)
                        .await
                        .unwrap_or_default()
                        .iter()
                        .filter_map(row_to_candidate)
                        .collect();

                    let publication_ref = PubRef {
                        ids: crate::ident::PubIds {
                            pmid: publication.pmid.clone(),
                            pmcid: publication.pmcid.clone(),
                            doi: publication.doi.clone(),
                            arxiv_id: publication.arxiv_id.clone(),
                        },
                        title: Some(publication.title.clone()),
                        year: publication.year.and_then(|y| i32::try_from(y).ok()),
                    };

                    let collection = fulltext.collect_urls(&publication_ref, &cached).await;
                    (pub_key, collection)
                }
            },
        ))
        .buffer_unordered(STAGE_FANOUT);

        while let Some((pub_key, collection)) = tasks.next().await {
            if collection.success {
                any_candidates = true;
            }
            if let Err(error) = self
                .registry
                .record_candidates(&pub_key, &collection.all_urls)
                .await
            {
                warn!(pub_key, error = %error, "failed to persist candidates");
            }
        }

        if any_candidates {
            Ok(())
        } else {
            Err("no URL candidates produced for any publication".to_string())
        }
    }

    /// P3: run the waterfall for publications still missing a PDF.
    async fn run_pdfs(&self, geo_id: &str) -> Result<(), String> {
        let publications = self
            .registry
            .publications_for(geo_id)
            .await
            .map_err(|e| e.to_string())?;
        if publications.is_empty() {
            return Err("no publications to download".to_string());
        }

        let mut successes = 0usize;
        let mut attempted = 0usize;

        let mut tasks = futures_util::stream::iter(publications.into_iter().map(
            |(publication, relationship)| {
                let registry = &self.registry;
                let downloads = &self.downloads;
                let warm = self.cache.warm();
                let geo_id = geo_id.to_string();
                async move {
                    let pub_key = publication.pub_key.clone();

                    // Shared-publication dedupe: an existing success row
                    // (from any dataset) means no second download.
                    match registry.successful_attempt(&pub_key).await {
                        Ok(Some(_)) => return (pub_key, None),
                        Ok(None) => {}
                        Err(error) => {
                            warn!(pub_key, error = %error, "attempt lookup failed");
                            return (pub_key, None);
                        }
                    }

                    let candidates: Vec<UrlCandidate> = registry
                        .candidates_for(&pub_key, false)
                        .await
                        .unwrap_or_default()
                        .iter()
                        .filter_map(row_to_candidate)
                        .collect();
                    if candidates.is_empty() {
                        return (pub_key, None);
                    }

                    let dest = warm.pdf_path(&geo_id, relationship.as_str(), &pub_key);
                    let result = downloads.download(&candidates, &dest).await;
                    (pub_key, Some(result))
                }
            },
        ))
        .buffer_unordered(STAGE_FANOUT);

        while let Some((pub_key, result)) = tasks.next().await {
            let Some(result) = result else {
                // Already downloaded or nothing to try.
                if self
                    .registry
                    .successful_attempt(&pub_key)
                    .await
                    .ok()
                    .flatten()
                    .is_some()
                {
                    successes += 1;
                }
                continue;
            };

            attempted += 1;
            let success = result.success;
            let info = match (&result.file_path, &result.sha256, result.file_size) {
                (Some(path), Some(sha256), Some(size)) => Some(SuccessInfo {
                    file_path: path.display().to_string(),
                    file_size: i64::try_from(size).unwrap_or(i64::MAX),
                    sha256: sha256.clone(),
                }),
                _ => None,
            };
            if let Err(error) = self
                .registry
                .record_attempts(&pub_key, &result.attempts, info.as_ref())
                .await
            {
                warn!(pub_key, error = %error, "failed to persist attempts");
            }
            if success {
                successes += 1;
            }
        }

        // A host-wide PMC block propagates to the candidate blacklist so
        // cached PMC URLs are not trusted on the next read.
        if self.pmc_blocklist.is_blocked() {
            for pattern in ["%//www.ncbi.nlm.nih.gov/pmc/%", "%//pmc.ncbi.nlm.nih.gov/%"] {
                if let Err(error) = self.registry.set_blacklisted_like(pattern, true).await {
                    warn!(error = %error, "failed to blacklist PMC candidates");
                }
            }
        }

        if successes > 0 {
            Ok(())
        } else if attempted == 0 {
            Err("no downloadable candidates for any publication".to_string())
        } else {
            Err(format!("all {attempted} waterfalls exhausted without a PDF"))
        }
    }

    /// P4: parse every downloaded-but-unparsed publication.
    ///
    /// The `STAGE_FANOUT` bound doubles as the parse worker pool: at most
    /// that many extractions sit on the blocking pool at once, and the
    /// bounded stream exerts backpressure on the producer side, so parsing
    /// can never pile up unboundedly behind the download stage.
    async fn run_parse(&self, geo_id: &str) -> Result<(), String> {
        let publications = self
            .registry
            .publications_for(geo_id)
            .await
            .map_err(|e| e.to_string())?;

        let mut parsed_count = 0usize;
        let mut pending = 0usize;

        let mut tasks = futures_util::stream::iter(publications.into_iter().map(
            |(publication, _relationship)| {
                let registry = &self.registry;
                async move {
                    let pub_key = publication.pub_key.clone();

                    match registry.parsed_ref(&pub_key).await {
                        Ok(Some(_)) => return (pub_key, ParseOutcome::AlreadyParsed),
                        Ok(None) => {}
                        Err(error) => {
                            return (pub_key, ParseOutcome::RegistryError(error.to_string()));
                        }
                    }

                    let attempt = match registry.successful_attempt(&pub_key).await {
                        Ok(Some(attempt)) => attempt,
                        Ok(None) => return (pub_key, ParseOutcome::NoPdf),
                        Err(error) => {
                            return (pub_key, ParseOutcome::RegistryError(error.to_string()));
                        }
                    };
                    let Some(file_path) = attempt.file_path else {
                        return (pub_key, ParseOutcome::NoPdf);
                    };

                    // CPU-bound extraction runs on the blocking pool so it
                    // never starves the I/O scheduler.
                    let path = std::path::PathBuf::from(&file_path);
                    match tokio::task::spawn_blocking(move || extract::extract(&path)).await {
                        Ok(Ok(content)) => (pub_key, ParseOutcome::Parsed(Box::new(content))),
                        Ok(Err(error)) => (pub_key, ParseOutcome::Failed(error.to_string())),
                        Err(join_error) => (
                            pub_key,
                            ParseOutcome::Failed(format!("parse task panicked: {join_error}")),
                        ),
                    }
                }
            },
        ))
        .buffer_unordered(STAGE_FANOUT);

        while let Some((pub_key, outcome)) = tasks.next().await {
            match outcome {
                ParseOutcome::AlreadyParsed => parsed_count += 1,
                ParseOutcome::NoPdf => {}
                ParseOutcome::RegistryError(error) => return Err(error),
                ParseOutcome::Parsed(content) => {
                    pending += 1;
                    let stored = StoredParsed::from_parsed(&content);
                    if let Err(error) = self.cache.put_parsed(&stored).await {
                        warn!(pub_key, error = %error, "failed to persist parsed content");
                        continue;
                    }
                    if let Err(error) = self.registry.set_parsed(&pub_key, &stored).await {
                        warn!(pub_key, error = %error, "failed to link parsed content");
                        continue;
                    }
                    parsed_count += 1;
                }
                ParseOutcome::Failed(reason) => {
                    pending += 1;
                    // Encrypted and corrupt PDFs are terminal per publication.
                    logfmt::log_event(
                        Status::Fail,
                        "parse",
                        "extraction failed",
                        &[("pub_key", &pub_key), ("reason", &reason)],
                    );
                }
            }
        }

        if parsed_count > 0 || pending == 0 {
            Ok(())
        } else {
            Err(format!("all {pending} extractions failed"))
        }
    }

    /// Writes the per-dataset manifest reflecting registry state.
    async fn write_manifest(&self, geo_id: &str) {
        let Ok(Some(complete)) = self.registry.get_complete(geo_id).await else {
            return;
        };

        let manifest = DatasetManifest {
            geo_id: geo_id.to_string(),
            generated_at: Some(Utc::now()),
            publications: complete
                .publications
                .iter()
                .map(|bundle| {
                    let winner = bundle.attempts.iter().find(|a| a.status == "success");
                    ManifestEntry {
                        pub_key: bundle.publication.pub_key.clone(),
                        relationship: bundle.relationship.as_str().to_string(),
                        pdf_file: winner.and_then(|a| a.file_path.clone()),
                        sha256: winner.and_then(|a| a.sha256.clone()),
                        attempts: bundle.attempts.len(),
                    }
                })
                .collect(),
        };

        if let Err(error) = self.cache.warm().write_manifest(&manifest).await {
            warn!(geo_id, error = %error, "failed to write dataset manifest");
        }
    }
}

/// Rebuilds a source-layer candidate from its persisted row.
fn row_to_candidate(row: &crate::registry::UrlCandidateRow) -> Option<UrlCandidate> {
    Some(UrlCandidate {
        url: row.url.clone(),
        source: row.source.clone(),
        url_type: row.url_type.parse().ok()?,
        priority: i32::try_from(row.priority).unwrap_or(i32::MAX),
        confidence: row.confidence,
        requires_auth: row.requires_auth != 0,
        metadata: row
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or_default(),
    })
}
