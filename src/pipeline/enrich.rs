//! Enrichment service: the idempotent boundary the API layer calls.
//!
//! Given dataset seeds and a desired completeness level, invokes the
//! coordinator per dataset with bounded concurrency and assembles
//! per-dataset snapshots. A rerun at an already-achieved level is a
//! cache-hit ladder climb: no stage runs and no outbound call is made.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::logfmt::{self, Status};
use crate::registry::{CompleteGeoData, CompletenessLevel, DatasetStatistics, Relationship};
use crate::util::sha256_hex;

use super::coordinator::{Coordinator, DatasetSeed, PipelineError};

/// Concurrent datasets processed by one enrichment request.
const DATASET_FANOUT: usize = 4;

/// The request contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichRequest {
    pub datasets: Vec<DatasetSeed>,
    pub desired_level: CompletenessLevel,
    #[serde(default)]
    pub max_papers_per_dataset: Option<usize>,
}

/// The response contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichResponse {
    pub datasets: Vec<DatasetSnapshot>,
}

/// One dataset's snapshot in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub geo_id: String,
    pub completeness: CompletenessLevel,
    pub title: Option<String>,
    pub organism: Option<String>,
    pub summary: Option<String>,
    pub publications: Vec<PublicationRecord>,
    /// `complete`, `partial`, `failed`, or `pending`.
    pub fulltext_status: String,
    pub fulltext_count: usize,
    pub statistics: DatasetStatistics,
}

/// One publication in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    /// `original` or `citing`.
    pub paper_type: Relationship,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedSummary>,
    pub download_history: Vec<AttemptSummary>,
}

/// Parsed-content summary embedded in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSummary {
    pub content_sha256: String,
    pub quality_score: f64,
    pub parser: String,
}

/// One download attempt in a snapshot's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub url: String,
    pub source: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A stage-transition progress event for subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub geo_id: String,
    pub level: CompletenessLevel,
}

/// The boundary service.
pub struct EnrichmentService {
    coordinator: Arc<Coordinator>,
}

impl EnrichmentService {
    /// Creates the service over a wired coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Enriches every dataset in the request and returns their snapshots.
    ///
    /// Dataset order in the input does not affect results; snapshots come
    /// back in input order. Individual dataset failures produce the best
    /// available snapshot instead of failing the batch.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only for registry-level failures while
    /// assembling snapshots.
    #[instrument(skip(self, request, progress), fields(datasets = request.datasets.len()))]
    pub async fn enrich(
        &self,
        request: &EnrichRequest,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<EnrichResponse, PipelineError> {
        let outcomes: Vec<(usize, DatasetSnapshot)> = futures_util::stream::iter(
            request.datasets.iter().enumerate().map(|(position, seed)| {
                let coordinator = Arc::clone(&self.coordinator);
                let progress = progress.clone();
                let desired = request.desired_level;
                async move {
                    let geo_id = seed.geo_id.clone();
                    let budget = coordinator.dataset_timeout();
                    match tokio::time::timeout(budget, coordinator.enrich_dataset(seed, desired))
                        .await
                    {
                        Ok(Ok(outcome)) => {
                            if let Some(sender) = &progress {
                                let _ = sender.send(ProgressEvent {
                                    geo_id: outcome.geo_id.clone(),
                                    level: outcome.level,
                                });
                            }
                        }
                        Ok(Err(error)) => {
                            logfmt::log_event(
                                Status::Warn,
                                "enrich",
                                "dataset enrichment errored; returning best snapshot",
                                &[("geo_id", &geo_id), ("error", &error.to_string())],
                            );
                        }
                        Err(_elapsed) => {
                            logfmt::log_event(
                                Status::Warn,
                                "enrich",
                                "dataset exceeded its budget; returning best snapshot",
                                &[("geo_id", &geo_id), ("budget_s", &budget.as_secs().to_string())],
                            );
                        }
                    }

                    let snapshot = match coordinator.registry().get_complete(&geo_id).await {
                        Ok(Some(complete)) => build_snapshot(complete, false),
                        Ok(None) => empty_snapshot(&geo_id),
                        Err(error) => {
                            warn!(geo_id, error = %error, "snapshot assembly failed");
                            empty_snapshot(&geo_id)
                        }
                    };
                    (position, snapshot)
                }
            }),
        )
        .buffer_unordered(DATASET_FANOUT)
        .collect()
        .await;

        let mut ordered: Vec<_> = outcomes;
        ordered.sort_by_key(|(position, _)| *position);

        Ok(EnrichResponse {
            datasets: ordered.into_iter().map(|(_, snapshot)| snapshot).collect(),
        })
    }

    /// The single-dataset snapshot (`GET /geo/{id}/complete`).
    ///
    /// With `verify`, the stored SHA-256 of each PDF is compared against
    /// the file on disk and mismatches are surfaced as warnings; the
    /// snapshot itself still returns.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on registry failure.
    #[instrument(skip(self))]
    pub async fn complete_snapshot(
        &self,
        geo_id: &str,
        verify: bool,
    ) -> Result<Option<DatasetSnapshot>, PipelineError> {
        let Some(complete) = self.coordinator.registry().get_complete(geo_id).await? else {
            return Ok(None);
        };

        if verify {
            verify_integrity(&complete).await;
        }
        Ok(Some(build_snapshot(complete, verify)))
    }
}

/// Compares stored hashes against on-disk bytes; mismatches log
/// `IntegrityMismatch` without failing the read.
async fn verify_integrity(complete: &CompleteGeoData) {
    for bundle in &complete.publications {
        let winner = bundle.attempts.iter().find(|a| a.status == "success");
        let Some((path, stored_sha)) = winner.and_then(|a| {
            a.file_path
                .as_ref()
                .zip(a.sha256.as_ref())
                .map(|(p, s)| (p.clone(), s.clone()))
        }) else {
            continue;
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let actual = sha256_hex(&bytes);
                if actual != stored_sha {
                    logfmt::log_event(
                        Status::Warn,
                        "registry",
                        "IntegrityMismatch: stored PDF hash differs from file",
                        &[
                            ("pub_key", &bundle.publication.pub_key),
                            ("path", &path),
                            ("stored", &stored_sha[..12]),
                            ("actual", &actual[..12]),
                        ],
                    );
                }
            }
            Err(error) => {
                logfmt::log_event(
                    Status::Warn,
                    "registry",
                    "IntegrityMismatch: stored PDF missing on disk",
                    &[("path", &path), ("error", &error.to_string())],
                );
            }
        }
    }
}

fn empty_snapshot(geo_id: &str) -> DatasetSnapshot {
    DatasetSnapshot {
        geo_id: geo_id.to_string(),
        completeness: CompletenessLevel::MetadataOnly,
        title: None,
        organism: None,
        summary: None,
        publications: Vec::new(),
        fulltext_status: "pending".to_string(),
        fulltext_count: 0,
        statistics: DatasetStatistics::default(),
    }
}

/// Projects the registry's complete view onto the response contract.
fn build_snapshot(complete: CompleteGeoData, _verified: bool) -> DatasetSnapshot {
    let statistics = complete.statistics.clone();

    let publications: Vec<PublicationRecord> = complete
        .publications
        .into_iter()
        .map(|bundle| {
            let winner = bundle.attempts.iter().find(|a| a.status == "success");
            PublicationRecord {
                pmid: bundle.publication.pmid.clone(),
                doi: bundle.publication.doi.clone(),
                pmcid: bundle.publication.pmcid.clone(),
                arxiv_id: bundle.publication.arxiv_id.clone(),
                title: bundle.publication.title.clone(),
                authors: bundle.publication.author_list(),
                year: bundle.publication.year,
                paper_type: bundle.relationship,
                pdf_path: winner.and_then(|a| a.file_path.clone()),
                sha256: winner.and_then(|a| a.sha256.clone()),
                parsed: bundle.parsed.map(|p| ParsedSummary {
                    content_sha256: p.content_sha256,
                    quality_score: p.quality_score,
                    parser: p.parser,
                }),
                download_history: bundle
                    .attempts
                    .iter()
                    .map(|a| AttemptSummary {
                        url: a.url.clone(),
                        source: a.source.clone(),
                        status: a.status.clone(),
                        http_status: a.http_status,
                        error: a.error.clone(),
                    })
                    .collect(),
            }
        })
        .collect();

    let fulltext_count = publications.iter().filter(|p| p.pdf_path.is_some()).count();
    let attempted_any = publications.iter().any(|p| !p.download_history.is_empty());
    let fulltext_status = if fulltext_count == 0 && !attempted_any {
        "pending"
    } else if fulltext_count == 0 {
        "failed"
    } else if fulltext_count < publications.len() {
        "partial"
    } else {
        "complete"
    };

    DatasetSnapshot {
        geo_id: complete.dataset.geo_id.clone(),
        completeness: complete.dataset.completeness(),
        title: complete.dataset.title.clone(),
        organism: complete.dataset.organism.clone(),
        summary: complete.dataset.summary,
        publications,
        fulltext_status: fulltext_status.to_string(),
        fulltext_count,
        statistics,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{DatasetRow, DownloadAttemptRow, PublicationBundle, PublicationRow};

    fn dataset_row(geo_id: &str) -> DatasetRow {
        DatasetRow {
            geo_id: geo_id.to_string(),
            title: Some("T".to_string()),
            summary: None,
            organism: Some("Mus musculus".to_string()),
            platform: None,
            sample_count: None,
            submission_date: None,
            publication_date: None,
            pubmed_ids: "[]".to_string(),
            completeness_str: "with_pdfs".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn publication_row(pub_key: &str) -> PublicationRow {
        PublicationRow {
            pub_key: pub_key.to_string(),
            pmid: Some("1".to_string()),
            pmcid: None,
            doi: None,
            arxiv_id: None,
            title: "Paper".to_string(),
            authors: r#"["A. Author"]"#.to_string(),
            journal: None,
            year: Some(2020),
            abstract_text: None,
            citation_count: None,
            discovery_source: Some("pubmed".to_string()),
            quality_score: Some(0.5),
            quality_band: Some("good".to_string()),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn attempt(status: &str, path: Option<&str>) -> DownloadAttemptRow {
        DownloadAttemptRow {
            id: 1,
            pub_key: "pmid-1".to_string(),
            url: "https://a".to_string(),
            source: "pmc".to_string(),
            status: status.to_string(),
            http_status: None,
            error: None,
            file_path: path.map(String::from),
            file_size: None,
            sha256: path.map(|_| "abc".to_string()),
            attempted_at: String::new(),
        }
    }

    fn complete_with(attempts: Vec<DownloadAttemptRow>) -> CompleteGeoData {
        CompleteGeoData {
            dataset: dataset_row("GSE1"),
            publications: vec![PublicationBundle {
                publication: publication_row("pmid-1"),
                relationship: Relationship::Original,
                candidates: Vec::new(),
                attempts,
                parsed: None,
            }],
            statistics: DatasetStatistics::default(),
        }
    }

    #[test]
    fn test_snapshot_complete_status() {
        let snapshot = build_snapshot(
            complete_with(vec![attempt("success", Some("p.pdf"))]),
            false,
        );
        assert_eq!(snapshot.fulltext_status, "complete");
        assert_eq!(snapshot.fulltext_count, 1);
        assert_eq!(snapshot.publications[0].pdf_path.as_deref(), Some("p.pdf"));
        assert_eq!(snapshot.publications[0].sha256.as_deref(), Some("abc"));
    }

    #[test]
    fn test_snapshot_failed_status() {
        let snapshot = build_snapshot(complete_with(vec![attempt("failed", None)]), false);
        assert_eq!(snapshot.fulltext_status, "failed");
        assert_eq!(snapshot.fulltext_count, 0);
        assert_eq!(snapshot.publications[0].download_history.len(), 1);
    }

    #[test]
    fn test_snapshot_pending_status() {
        let snapshot = build_snapshot(complete_with(Vec::new()), false);
        assert_eq!(snapshot.fulltext_status, "pending");
    }

    #[test]
    fn test_snapshot_carries_paper_type_and_authors() {
        let snapshot = build_snapshot(complete_with(Vec::new()), false);
        assert_eq!(snapshot.publications[0].paper_type, Relationship::Original);
        assert_eq!(snapshot.publications[0].authors, vec!["A. Author"]);
    }

    #[test]
    fn test_empty_snapshot_shape() {
        let snapshot = empty_snapshot("GSE404");
        assert_eq!(snapshot.geo_id, "GSE404");
        assert_eq!(snapshot.completeness, CompletenessLevel::MetadataOnly);
        assert_eq!(snapshot.fulltext_status, "pending");
    }
}
