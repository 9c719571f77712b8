//! Europe PMC citations client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::config::EnrichConfig;
use crate::ident::PubIds;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{CitationRecord, CitationSource, SourceClient, SourceError, SourceResult};

const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

/// Europe PMC REST client; citation discovery only.
pub struct EuropePmcClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl EuropePmcClient {
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
}

impl SourceClient for EuropePmcClient {
    fn name(&self) -> &'static str {
        "europepmc"
    }
}

#[async_trait]
impl CitationSource for EuropePmcClient {
    #[instrument(skip(self, ids))]
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>> {
        let Some(pmid) = &ids.pmid else {
            return Ok(Vec::new());
        };

        let url = format!("{}/MED/{pmid}/citations", self.base_url);
        let response = send_with_retry(&self.limiter, "europepmc", || {
            self.client
                .get(&url)
                .query(&[("format", "json"), ("pageSize", "100")])
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("europepmc body: {e}")))?;

        let records: Vec<CitationRecord> = body["citationList"]["citation"]
            .as_array()
            .map(|items| items.iter().filter_map(citation_from_entry).collect())
            .unwrap_or_default();

        logfmt::log_event(
            Status::Ok,
            "europepmc",
            "citations fetched",
            &[("pmid", pmid), ("count", &records.len().to_string())],
        );
        Ok(records)
    }
}

impl std::fmt::Debug for EuropePmcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuropePmcClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn citation_from_entry(entry: &serde_json::Value) -> Option<CitationRecord> {
    let title = entry["title"].as_str()?.to_string();

    let pmid = entry["id"]
        .as_str()
        .filter(|_| entry["source"].as_str() == Some("MED"));
    let ids = PubIds::sanitized(pmid, None, entry["doi"].as_str(), None);
    if ids.is_empty() {
        return None;
    }

    Some(CitationRecord {
        ids,
        title,
        authors: entry["authorString"]
            .as_str()
            .map(|s| s.split(", ").map(String::from).collect())
            .unwrap_or_default(),
        journal: entry["journalAbbreviation"].as_str().map(String::from),
        year: entry["pubYear"].as_i64().and_then(|y| i32::try_from(y).ok()),
        abstract_text: None,
        citation_count: entry["citedByCount"].as_i64(),
    })
}
