//! Unpaywall best-OA-location lookup.
//!
//! One GET per DOI; the API requires a contact email on every request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::classify;
use crate::config::EnrichConfig;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceError, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org/v2";

/// Unpaywall client; emits the best open-access location for a DOI.
pub struct UnpaywallClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    email: String,
}

impl UnpaywallClient {
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
            client: standard_client(&config.unpaywall_email, config.request_timeout()),
            limiter,
            base_url: base_url.into(),
            email: config.unpaywall_email.clone(),
        }
    }
}

impl SourceClient for UnpaywallClient {
    fn name(&self) -> &'static str {
        "unpaywall"
    }

    fn base_priority(&self) -> i32 {
        20
    }
}

#[async_trait]
impl UrlSource for UnpaywallClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };

        let url = format!("{}/{doi}", self.base_url);
        let response = send_with_retry(&self.limiter, "unpaywall", || {
            self.client.get(&url).query(&[("email", &self.email)])
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("unpaywall body: {e}")))?;

        let location = &body["best_oa_location"];
        if location.is_null() {
            logfmt::log_event(Status::Skip, "unpaywall", "no OA location", &[("doi", doi)]);
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();

        if let Some(pdf_url) = location["url_for_pdf"].as_str() {
            let mut candidate = UrlCandidate::new(
                pdf_url,
                self.name(),
                classify::classify(pdf_url),
                self.base_priority(),
            );
            candidate.confidence = 0.9;
            candidates.push(candidate);
        }

        if let Some(page_url) = location["url"].as_str()
            && candidates.iter().all(|c| c.url != page_url)
        {
            candidates.push(UrlCandidate::new(
                page_url,
                self.name(),
                classify::classify(page_url),
                self.base_priority() + 2,
            ));
        }

        logfmt::log_event(
            Status::Ok,
            "unpaywall",
            "OA location found",
            &[("doi", doi), ("candidates", &candidates.len().to_string())],
        );
        Ok(candidates)
    }
}

impl std::fmt::Debug for UnpaywallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpaywallClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
