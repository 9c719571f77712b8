//! OpenCitations COCI index client.
//!
//! COCI reports citing DOIs without titles or authors; records surface with
//! the DOI only and are hydrated during the discovery merge when another
//! source saw the same paper.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::config::EnrichConfig;
use crate::ident::PubIds;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{CitationRecord, CitationSource, SourceClient, SourceError, SourceResult};

const DEFAULT_BASE_URL: &str = "https://opencitations.net/index/coci/api/v1";

/// OpenCitations client; citation discovery only.
pub struct OpenCitationsClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl OpenCitationsClient {
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

impl SourceClient for OpenCitationsClient {
    fn name(&self) -> &'static str {
        "opencitations"
    }
}

#[async_trait]
impl CitationSource for OpenCitationsClient {
    #[instrument(skip(self, ids))]
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>> {
        let Some(doi) = &ids.doi else {
            return Ok(Vec::new());
        };

        let url = format!("{}/citations/{doi}", self.base_url);
        let response =
            send_with_retry(&self.limiter, "opencitations", || self.client.get(&url)).await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("opencitations body: {e}")))?;

        let records: Vec<CitationRecord> = body
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let citing_doi = entry["citing"].as_str()?;
                        let ids = PubIds::sanitized(None, None, Some(citing_doi), None);
                        if ids.is_empty() {
                            return None;
                        }
                        Some(CitationRecord {
                            ids,
                            // COCI carries no bibliographic fields; the merge
                            // hydrates the title from richer sources.
                            title: citing_doi.to_string(),
                            ..CitationRecord::default()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        logfmt::log_event(
            Status::Ok,
            "opencitations",
            "citing DOIs fetched",
            &[("doi", doi), ("count", &records.len().to_string())],
        );
        Ok(records)
    }
}

impl std::fmt::Debug for OpenCitationsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCitationsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
