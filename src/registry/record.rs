//! Row types and enums for the persistent registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The ordered completeness ladder for a dataset.
///
/// Derives `Ord` so `MetadataOnly < WithCitations < ... < FullyEnriched`;
/// the coordinator relies on this ordering for monotonic advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessLevel {
    MetadataOnly,
    WithCitations,
    WithUrls,
    WithPdfs,
    FullyEnriched,
}

impl CompletenessLevel {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetadataOnly => "metadata_only",
            Self::WithCitations => "with_citations",
            Self::WithUrls => "with_urls",
            Self::WithPdfs => "with_pdfs",
            Self::FullyEnriched => "fully_enriched",
        }
    }
}

impl fmt::Display for CompletenessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompletenessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata_only" => Ok(Self::MetadataOnly),
            "with_citations" => Ok(Self::WithCitations),
            "with_urls" => Ok(Self::WithUrls),
            "with_pdfs" => Ok(Self::WithPdfs),
            "fully_enriched" => Ok(Self::FullyEnriched),
            _ => Err(format!("invalid completeness level: {s}")),
        }
    }
}

/// How a publication relates to a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Original,
    Citing,
}

impl Relationship {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Citing => "citing",
        }
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Self::Original),
            "citing" => Ok(Self::Citing),
            _ => Err(format!("invalid relationship: {s}")),
        }
    }
}

/// Pipeline stage keys for per-stage job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Citations,
    Urls,
    Pdfs,
    Parse,
}

impl Stage {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Citations => "citations",
            Self::Urls => "urls",
            Self::Pdfs => "pdfs",
            Self::Parse => "parse",
        }
    }

    /// Completeness level reached when this stage succeeds.
    #[must_use]
    pub fn level_on_success(self) -> CompletenessLevel {
        match self {
            Self::Citations => CompletenessLevel::WithCitations,
            Self::Urls => CompletenessLevel::WithUrls,
            Self::Pdfs => CompletenessLevel::WithPdfs,
            Self::Parse => CompletenessLevel::FullyEnriched,
        }
    }

    /// The stages required to climb from `current` to `desired`, in order.
    #[must_use]
    pub fn required(
        current: CompletenessLevel,
        desired: CompletenessLevel,
    ) -> Vec<Self> {
        [Self::Citations, Self::Urls, Self::Pdfs, Self::Parse]
            .into_iter()
            .filter(|stage| {
                stage.level_on_success() > current && stage.level_on_success() <= desired
            })
            .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dataset row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DatasetRow {
    pub geo_id: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<i64>,
    pub submission_date: Option<String>,
    pub publication_date: Option<String>,
    /// JSON array of primary PMIDs.
    pub pubmed_ids: String,
    /// Stored as text, parsed via [`DatasetRow::completeness`].
    #[sqlx(rename = "completeness")]
    pub completeness_str: String,
    pub created_at: String,
    pub updated_at: String,
}

impl DatasetRow {
    /// Parsed completeness level; invalid text degrades to the floor.
    #[must_use]
    pub fn completeness(&self) -> CompletenessLevel {
        self.completeness_str
            .parse()
            .unwrap_or(CompletenessLevel::MetadataOnly)
    }

    /// Parsed primary PMIDs.
    #[must_use]
    pub fn pubmed_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.pubmed_ids).unwrap_or_default()
    }
}

/// A publication row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PublicationRow {
    pub pub_key: String,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub title: String,
    /// JSON array of author names.
    pub authors: String,
    pub journal: Option<String>,
    pub year: Option<i64>,
    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub citation_count: Option<i64>,
    pub discovery_source: Option<String>,
    pub quality_score: Option<f64>,
    pub quality_band: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PublicationRow {
    /// Parsed author list.
    #[must_use]
    pub fn author_list(&self) -> Vec<String> {
        serde_json::from_str(&self.authors).unwrap_or_default()
    }
}

/// A persisted URL candidate.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UrlCandidateRow {
    pub id: i64,
    pub pub_key: String,
    pub url: String,
    pub source: String,
    pub url_type: String,
    pub priority: i64,
    pub confidence: f64,
    pub requires_auth: i64,
    pub blacklisted: i64,
    /// JSON map of per-candidate metadata.
    pub metadata: Option<String>,
    pub created_at: String,
}

/// A persisted download attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DownloadAttemptRow {
    pub id: i64,
    pub pub_key: String,
    pub url: String,
    pub source: String,
    pub status: String,
    pub http_status: Option<i64>,
    pub error: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub sha256: Option<String>,
    pub attempted_at: String,
}

/// Per-stage enrichment job state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EnrichmentJobRow {
    pub geo_id: String,
    pub stage: String,
    pub status: String,
    pub last_attempt_at: Option<String>,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

/// A publication's parsed-content reference.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ParsedRef {
    pub content_sha256: String,
    pub quality_score: f64,
    pub parser: String,
}

/// Aggregated statistics for a dataset snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub original: usize,
    pub citing: usize,
    pub successful_downloads: usize,
    pub failed_downloads: usize,
    pub success_rate: f64,
}

/// One publication plus everything linked to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationBundle {
    pub publication: PublicationRow,
    pub relationship: Relationship,
    pub candidates: Vec<UrlCandidateRow>,
    pub attempts: Vec<DownloadAttemptRow>,
    pub parsed: Option<ParsedRef>,
}

/// The single-query complete view of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteGeoData {
    pub dataset: DatasetRow,
    pub publications: Vec<PublicationBundle>,
    pub statistics: DatasetStatistics,
}
