//! Semantic Scholar Graph API citations client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::config::EnrichConfig;
use crate::ident::PubIds;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{CitationRecord, CitationSource, SourceClient, SourceError, SourceResult};

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

const CITATION_FIELDS: &str = "title,year,abstract,externalIds,citationCount,authors,venue";

/// Semantic Scholar client; citation discovery only.
pub struct SemanticScholarClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl SemanticScholarClient {
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
        }
    }

    fn paper_selector(ids: &PubIds) -> Option<String> {
        if let Some(pmid) = &ids.pmid {
            return Some(format!("PMID:{pmid}"));
        }
        if let Some(doi) = &ids.doi {
            return Some(format!("DOI:{doi}"));
        }
        ids.arxiv_id.as_ref().map(|id| format!("ARXIV:{id}"))
    }
}

impl SourceClient for SemanticScholarClient {
    fn name(&self) -> &'static str {
        "semantic_scholar"
    }
}

#[async_trait]
impl CitationSource for SemanticScholarClient {
    #[instrument(skip(self, ids))]
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>> {
        let Some(selector) = Self::paper_selector(ids) else {
            return Ok(Vec::new());
        };

        let url = format!("{}/paper/{selector}/citations", self.base_url);
        let response = send_with_retry(&self.limiter, "semantic_scholar", || {
            self.client
                .get(&url)
                .query(&[("fields", CITATION_FIELDS), ("limit", "100")])
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("semantic scholar body: {e}")))?;

        let records: Vec<CitationRecord> = body["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| citation_from_paper(&item["citingPaper"]))
                    .collect()
            })
            .unwrap_or_default();

        logfmt::log_event(
            Status::Ok,
            "semantic_scholar",
            "citing papers fetched",
            &[("count", &records.len().to_string())],
        );
        Ok(records)
    }
}

impl std::fmt::Debug for SemanticScholarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn citation_from_paper(paper: &serde_json::Value) -> Option<CitationRecord> {
    let title = paper["title"].as_str()?.to_string();

    let external = &paper["externalIds"];
    let ids = PubIds::sanitized(
        external["PubMed"].as_str(),
        None,
        external["DOI"].as_str(),
        external["ArXiv"].as_str(),
    );
    if ids.is_empty() {
        return None;
    }

    Some(CitationRecord {
        ids,
        title,
        authors: paper["authors"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|a| a["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        journal: paper["venue"].as_str().filter(|v| !v.is_empty()).map(String::from),
        year: paper["year"].as_i64().and_then(|y| i32::try_from(y).ok()),
        abstract_text: paper["abstract"].as_str().map(String::from),
        citation_count: paper["citationCount"].as_i64(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_selector_precedence() {
        let ids = PubIds::sanitized(Some("1"), None, Some("10.1/x"), Some("2301.00001"));
        assert_eq!(SemanticScholarClient::paper_selector(&ids).unwrap(), "PMID:1");

        let ids = PubIds::sanitized(None, None, Some("10.1/x"), Some("2301.00001"));
        assert_eq!(
            SemanticScholarClient::paper_selector(&ids).unwrap(),
            "DOI:10.1/x"
        );

        let ids = PubIds::sanitized(None, None, None, Some("2301.00001"));
        assert_eq!(
            SemanticScholarClient::paper_selector(&ids).unwrap(),
            "ARXIV:2301.00001"
        );
    }

    #[test]
    fn test_citation_from_paper() {
        let paper = serde_json::json!({
            "title": "Citing work",
            "externalIds": {"PubMed": "123", "DOI": "10.1/abc"},
            "year": 2020,
            "venue": "Cell",
            "citationCount": 7,
            "abstract": "Background text.",
            "authors": [{"name": "A. Author"}]
        });
        let record = citation_from_paper(&paper).unwrap();
        assert_eq!(record.ids.pmid.as_deref(), Some("123"));
        assert_eq!(record.journal.as_deref(), Some("Cell"));
        assert_eq!(record.citation_count, Some(7));
    }

    #[test]
    fn test_citation_from_paper_skips_idless_entries() {
        let paper = serde_json::json!({"title": "No ids", "externalIds": {}});
        assert!(citation_from_paper(&paper).is_none());
    }
}
