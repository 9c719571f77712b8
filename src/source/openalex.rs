//! OpenAlex works API client.
//!
//! Covers two capabilities: citing-works discovery (P1) and open-access PDF
//! location (P2). OpenAlex also serves as the fallback lookup when the only
//! cached candidate for a publication is a blocked PMC URL.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::classify;
use crate::config::EnrichConfig;
use crate::ident::PubIds;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{
    CitationRecord, CitationSource, PubRef, SourceClient, SourceError, SourceResult, UrlCandidate,
    UrlSource,
};

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

/// Page size for citing-works queries; one page per publication.
const CITES_PER_PAGE: usize = 50;

/// OpenAlex client.
pub struct OpenAlexClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    mailto: String,
}

impl OpenAlexClient {
    /// Creates a client against the production API.
    #[must_use]
    pub fn new(config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(config, limiter, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom endpoint for tests.
    #[must_use]
    pub fn with_base_url(
        config: &EnrichConfig,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: standard_client(&config.ncbi_contact_email, config.request_timeout()),
            limiter,
            base_url: base_url.into(),
            mailto: config.ncbi_contact_email.clone(),
        }
    }

    /// The OpenAlex external-id path segment for an id set, if resolvable.
    fn work_selector(ids: &PubIds) -> Option<String> {
        if let Some(doi) = &ids.doi {
            return Some(format!("doi:{doi}"));
        }
        if let Some(pmid) = &ids.pmid {
            return Some(format!("pmid:{pmid}"));
        }
        None
    }

    /// Fetches the work record for an id set.
    async fn fetch_work(&self, ids: &PubIds) -> SourceResult<serde_json::Value> {
        let selector = Self::work_selector(ids).ok_or(SourceError::NotFound)?;
        let url = format!("{}/works/{selector}", self.base_url);

        let response = send_with_retry(&self.limiter, "openalex", || {
            self.client.get(&url).query(&[("mailto", &self.mailto)])
        })
        .await?;

        response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("openalex body: {e}")))
    }

    /// OA PDF candidates from a work record's locations.
    fn candidates_from_work(&self, work: &serde_json::Value) -> Vec<UrlCandidate> {
        let mut candidates = Vec::new();

        for (location, bump) in [
            (&work["best_oa_location"], 0),
            (&work["primary_location"], 2),
        ] {
            if location.is_null() {
                continue;
            }
            if let Some(pdf_url) = location["pdf_url"].as_str() {
                let mut candidate = UrlCandidate::new(
                    pdf_url,
                    self.name(),
                    classify::classify(pdf_url),
                    self.base_priority() + bump,
                );
                candidate.confidence = 0.8;
                if candidates.iter().all(|c: &UrlCandidate| c.url != pdf_url) {
                    candidates.push(candidate);
                }
            } else if let Some(page_url) = location["landing_page_url"].as_str()
                && candidates.iter().all(|c| c.url != page_url)
            {
                candidates.push(UrlCandidate::new(
                    page_url,
                    self.name(),
                    classify::classify(page_url),
                    self.base_priority() + bump + 3,
                ));
            }
        }

        candidates
    }

    /// Runs the OA fallback for a publication whose only candidates were
    /// blocked PMC URLs. Non-PMC candidates only.
    ///
    /// # Errors
    ///
    /// Returns the transport error; an unresolvable id set maps to
    /// [`SourceError::NotFound`].
    #[instrument(skip(self, ids))]
    pub async fn fetch_oa_fallback(&self, ids: &PubIds) -> SourceResult<Vec<UrlCandidate>> {
        let work = self.fetch_work(ids).await?;
        let candidates: Vec<UrlCandidate> = self
            .candidates_from_work(&work)
            .into_iter()
            .filter(|c| !classify::is_pmc_host(&c.url))
            .collect();
        logfmt::log_event(
            Status::Ok,
            "openalex",
            "PMC fallback lookup",
            &[("candidates", &candidates.len().to_string())],
        );
        Ok(candidates)
    }
}

impl SourceClient for OpenAlexClient {
    fn name(&self) -> &'static str {
        "openalex"
    }

    fn base_priority(&self) -> i32 {
        30
    }
}

#[async_trait]
impl CitationSource for OpenAlexClient {
    #[instrument(skip(self, ids))]
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>> {
        let work = self.fetch_work(ids).await?;
        let Some(work_id) = work["id"]
            .as_str()
            .and_then(|id| id.rsplit('/').next())
            .map(String::from)
        else {
            return Err(SourceError::NotFound);
        };

        let url = format!("{}/works", self.base_url);
        let filter = format!("cites:{work_id}");
        let per_page = CITES_PER_PAGE.to_string();
        let response = send_with_retry(&self.limiter, "openalex", || {
            self.client.get(&url).query(&[
                ("filter", filter.as_str()),
                ("per-page", per_page.as_str()),
                ("mailto", self.mailto.as_str()),
            ])
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("openalex body: {e}")))?;

        let records: Vec<CitationRecord> = body["results"]
            .as_array()
            .map(|works| works.iter().filter_map(citation_from_work).collect())
            .unwrap_or_default();

        logfmt::log_event(
            Status::Ok,
            "openalex",
            "citing works fetched",
            &[("count", &records.len().to_string())],
        );
        Ok(records)
    }
}

#[async_trait]
impl UrlSource for OpenAlexClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        if Self::work_selector(&publication.ids).is_none() {
            return Ok(Vec::new());
        }
        let work = self.fetch_work(&publication.ids).await?;
        Ok(self.candidates_from_work(&work))
    }
}

impl std::fmt::Debug for OpenAlexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlexClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Maps an OpenAlex work object onto a citation record.
///
/// Works without a title are dropped; identifier URLs are reduced to their
/// bare ids.
fn citation_from_work(work: &serde_json::Value) -> Option<CitationRecord> {
    let title = work["title"].as_str()?.to_string();

    let strip_prefix = |value: &serde_json::Value, prefix: &str| {
        value
            .as_str()
            .map(|s| s.trim_start_matches(prefix).to_string())
    };

    let ids = PubIds::sanitized(
        strip_prefix(&work["ids"]["pmid"], "https://pubmed.ncbi.nlm.nih.gov/").as_deref(),
        None,
        strip_prefix(&work["doi"], "https://doi.org/").as_deref(),
        None,
    );
    if ids.is_empty() {
        return None;
    }

    let authors = work["authorships"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|a| a["author"]["display_name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Some(CitationRecord {
        ids,
        title,
        authors,
        journal: work["primary_location"]["source"]["display_name"]
            .as_str()
            .map(String::from),
        year: work["publication_year"]
            .as_i64()
            .and_then(|y| i32::try_from(y).ok()),
        abstract_text: None,
        citation_count: work["cited_by_count"].as_i64(),
    })
}
