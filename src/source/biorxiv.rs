//! bioRxiv preprint lookup.
//!
//! The details API confirms a DOI belongs to bioRxiv and reports the latest
//! version, from which the full-text PDF URL is derived. Unknown DOIs are a
//! terminal `NotFound`, never retried.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::classify::UrlType;
use crate::config::EnrichConfig;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceError, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_BASE_URL: &str = "https://api.biorxiv.org";

/// bioRxiv preprints publish under the 10.1101 registrant.
const BIORXIV_DOI_PREFIX: &str = "10.1101/";

/// bioRxiv client; URL collection only.
pub struct BiorxivClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl BiorxivClient {
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

impl SourceClient for BiorxivClient {
    fn name(&self) -> &'static str {
        "biorxiv"
    }

    fn base_priority(&self) -> i32 {
        14
    }
}

#[async_trait]
impl UrlSource for BiorxivClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = publication
            .ids
            .doi
            .as_deref()
            .filter(|d| d.starts_with(BIORXIV_DOI_PREFIX))
        else {
            return Ok(Vec::new());
        };

        let url = format!("{}/details/biorxiv/{doi}", self.base_url);
        let response = send_with_retry(&self.limiter, "biorxiv", || self.client.get(&url)).await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("biorxiv body: {e}")))?;

        let Some(entry) = body["collection"].as_array().and_then(|c| c.last()) else {
            logfmt::log_event(Status::Skip, "biorxiv", "DOI not on bioRxiv", &[("doi", doi)]);
            return Err(SourceError::NotFound);
        };

        let version = entry["version"].as_str().unwrap_or("1");
        let mut pdf = UrlCandidate::new(
            format!("https://www.biorxiv.org/content/{doi}v{version}.full.pdf"),
            self.name(),
            UrlType::DirectPdf,
            self.base_priority(),
        );
        pdf.confidence = 0.9;

        logfmt::log_event(
            Status::Ok,
            "biorxiv",
            "preprint located",
            &[("doi", doi), ("version", version)],
        );
        Ok(vec![pdf])
    }
}

impl std::fmt::Debug for BiorxivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiorxivClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
