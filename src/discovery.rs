//! Citation discovery (stage P1).
//!
//! Locates the originating publications of a GEO dataset via PubMed, fans
//! out across every citation-capable source for citing papers, then merges,
//! deduplicates, and quality-scores the union. Per-source contributions and
//! the duplicate rate are tracked for observability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::logfmt::{self, Status};
use crate::quality::{self, QualityAssessment, QualityBand};
use crate::source::{CitationRecord, SourceRegistry};
use crate::util::normalized_title_hash;

/// A merged publication with its provenance and quality assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPublication {
    pub record: CitationRecord,
    /// First source that returned this publication.
    pub discovery_source: String,
    pub quality: QualityAssessment,
}

/// Session metrics for one discovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryMetrics {
    /// Raw records before merge.
    pub total_raw: usize,
    /// Publications after merge.
    pub merged: usize,
    /// Fraction of raw records that were duplicates of an earlier one.
    pub duplicate_rate: f64,
    pub elapsed_ms: u64,
}

/// Result of one discovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub original: Vec<ScoredPublication>,
    pub citing: Vec<ScoredPublication>,
    /// Merged-publication counts per contributing source.
    pub source_contributions: HashMap<String, usize>,
    pub metrics: DiscoveryMetrics,
}

impl DiscoveryResult {
    /// True when at least one citing publication survived.
    #[must_use]
    pub fn has_citing(&self) -> bool {
        !self.citing.is_empty()
    }
}

/// The P1 engine.
pub struct CitationDiscovery {
    sources: Arc<SourceRegistry>,
    fanout_timeout: Duration,
}

impl CitationDiscovery {
    /// Creates a discovery engine over the given source registry.
    #[must_use]
    pub fn new(sources: Arc<SourceRegistry>, fanout_timeout: Duration) -> Self {
        Self {
            sources,
            fanout_timeout,
        }
    }

    /// Discovers the originating and citing publications for a dataset.
    ///
    /// `pubmed_ids` are the dataset's primary PMIDs. Partial results are
    /// normal: sources that fail or exceed the fan-out budget contribute
    /// nothing and the rest proceed.
    #[instrument(skip(self, pubmed_ids), fields(pmids = pubmed_ids.len()))]
    pub async fn discover(&self, pubmed_ids: &[String]) -> DiscoveryResult {
        let started = tokio::time::Instant::now();
        let current_year = chrono::Utc::now().year();

        // Originating papers, straight from PubMed metadata.
        let mut original = Vec::new();
        for pmid in pubmed_ids {
            match self.sources.pubmed().fetch_publication(pmid).await {
                Ok(record) => {
                    let assessment = quality::assess(&record, current_year);
                    original.push(ScoredPublication {
                        record,
                        discovery_source: "pubmed".to_string(),
                        quality: assessment,
                    });
                }
                Err(error) => {
                    logfmt::log_event(
                        Status::Warn,
                        "pubmed",
                        "originating publication lookup failed",
                        &[("pmid", pmid), ("reason", &error.to_string())],
                    );
                }
            }
        }

        // Citing papers: every citation source, for every originating paper,
        // in parallel under the fan-out budget.
        let mut fetches = Vec::new();
        for publication in &original {
            for source in self.sources.citation_sources() {
                let source = Arc::clone(source);
                let ids = publication.record.ids.clone();
                let budget = self.fanout_timeout;
                fetches.push(async move {
                    let name = source.name();
                    let outcome =
                        tokio::time::timeout(budget, source.fetch_citations(&ids)).await;
                    (name, outcome)
                });
            }
        }

        let mut raw: Vec<(String, CitationRecord)> = Vec::new();
        for (name, outcome) in futures_util::future::join_all(fetches).await {
            match outcome {
                Ok(Ok(records)) => {
                    debug!(source = name, count = records.len(), "citation source returned");
                    raw.extend(records.into_iter().map(|r| (name.to_string(), r)));
                }
                Ok(Err(error)) => {
                    logfmt::log_event(
                        Status::Warn,
                        name,
                        "citation fetch failed",
                        &[("reason", &error.to_string())],
                    );
                }
                Err(_elapsed) => {
                    logfmt::log_event(Status::Warn, name, "citation fetch timed out", &[]);
                }
            }
        }

        let total_raw = raw.len();
        let (merged, source_contributions) = merge_citations(raw);

        // Originating papers never count as citing their own dataset.
        let original_keys: std::collections::HashSet<String> = original
            .iter()
            .filter_map(|p| p.record.ids.pub_key().ok())
            .collect();

        let citing: Vec<ScoredPublication> = merged
            .into_iter()
            .filter(|(_, record)| {
                record
                    .ids
                    .pub_key()
                    .map(|key| !original_keys.contains(&key))
                    .unwrap_or(false)
            })
            .map(|(source, record)| {
                let assessment = quality::assess(&record, current_year);
                ScoredPublication {
                    record,
                    discovery_source: source,
                    quality: assessment,
                }
            })
            .filter(|p| p.quality.band != QualityBand::Rejected)
            .collect();

        let merged_count = citing.len();
        let duplicate_rate = if total_raw == 0 {
            0.0
        } else {
            1.0 - (merged_count.min(total_raw) as f64 / total_raw as f64)
        };

        #[allow(clippy::cast_possible_truncation)]
        let metrics = DiscoveryMetrics {
            total_raw,
            merged: merged_count,
            duplicate_rate,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        logfmt::log_event(
            Status::Ok,
            "discovery",
            "citation discovery finished",
            &[
                ("original", &original.len().to_string()),
                ("citing", &merged_count.to_string()),
                ("raw", &total_raw.to_string()),
                ("duplicate_rate", &format!("{duplicate_rate:.2}")),
            ],
        );

        DiscoveryResult {
            original,
            citing,
            source_contributions,
            metrics,
        }
    }
}

/// Merges raw per-source records into unique publications.
///
/// Union key is the first of (pmid, doi, normalized-title-hash). A later
/// duplicate is absorbed into the first occurrence: identifiers and missing
/// bibliographic fields fill in, `discovery_source` stays with the first
/// source that returned the publication.
fn merge_citations(
    raw: Vec<(String, CitationRecord)>,
) -> (Vec<(String, CitationRecord)>, HashMap<String, usize>) {
    let mut merged: Vec<(String, CitationRecord)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut contributions: HashMap<String, usize> = HashMap::new();

    for (source, record) in raw {
        let keys = dedup_keys(&record);
        if keys.is_empty() {
            warn!(title = %record.title, "dropping citation with no usable identity");
            continue;
        }

        if let Some(&position) = keys.iter().find_map(|k| index.get(k)) {
            let (_, existing) = &mut merged[position];
            absorb(existing, record);
            // Newly learned identifiers index the same entry.
            for key in dedup_keys(&merged[position].1) {
                index.entry(key).or_insert(position);
            }
        } else {
            let position = merged.len();
            for key in &keys {
                index.insert(key.clone(), position);
            }
            *contributions.entry(source.clone()).or_insert(0) += 1;
            merged.push((source, record));
        }
    }

    (merged, contributions)
}

/// Identity keys for a record, strongest first.
fn dedup_keys(record: &CitationRecord) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(pmid) = &record.ids.pmid {
        keys.push(format!("pmid:{pmid}"));
    }
    if let Some(doi) = &record.ids.doi {
        keys.push(format!("doi:{}", doi.to_ascii_lowercase()));
    }
    if !record.title.trim().is_empty() && record.title != record.ids.doi.clone().unwrap_or_default()
    {
        keys.push(format!("title:{}", normalized_title_hash(&record.title)));
    }
    keys
}

/// Fills gaps in `existing` from a duplicate sighting.
fn absorb(existing: &mut CitationRecord, duplicate: CitationRecord) {
    existing.ids.absorb(&duplicate.ids);
    // A DOI-placeholder title gives way to a real one.
    let existing_title_is_placeholder =
        Some(existing.title.as_str()) == existing.ids.doi.as_deref();
    if existing_title_is_placeholder && !duplicate.title.trim().is_empty() {
        existing.title = duplicate.title;
    }
    if existing.authors.is_empty() {
        existing.authors = duplicate.authors;
    }
    if existing.journal.is_none() {
        existing.journal = duplicate.journal;
    }
    if existing.year.is_none() {
        existing.year = duplicate.year;
    }
    if existing.abstract_text.is_none() {
        existing.abstract_text = duplicate.abstract_text;
    }
    if existing.citation_count.is_none() {
        existing.citation_count = duplicate.citation_count;
    }
}
