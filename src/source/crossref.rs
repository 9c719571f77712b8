//! Crossref works client.
//!
//! Crossref rarely hosts PDFs itself but its `link` metadata points at
//! publisher full-text endpoints, and the presence/absence of a license
//! entry is the paywall signal surfaced to the waterfall.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::classify;
use crate::config::EnrichConfig;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceError, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Crossref client; URL collection only.
pub struct CrossrefClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    mailto: String,
}

impl CrossrefClient {
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
}

impl SourceClient for CrossrefClient {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn base_priority(&self) -> i32 {
        40
    }
}

#[async_trait]
impl UrlSource for CrossrefClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };

        let url = format!("{}/works/{doi}", self.base_url);
        let response = send_with_retry(&self.limiter, "crossref", || {
            self.client.get(&url).query(&[("mailto", &self.mailto)])
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("crossref body: {e}")))?;

        let message = &body["message"];
        let has_license = message["license"]
            .as_array()
            .is_some_and(|l| !l.is_empty());

        let mut candidates = Vec::new();
        if let Some(links) = message["link"].as_array() {
            for link in links {
                let Some(link_url) = link["URL"].as_str() else {
                    continue;
                };
                let is_pdf = link["content-type"].as_str() == Some("application/pdf");
                let url_type = if is_pdf {
                    crate::classify::UrlType::DirectPdf
                } else {
                    classify::classify(link_url)
                };
                let mut candidate = UrlCandidate::new(
                    link_url,
                    self.name(),
                    url_type,
                    self.base_priority() + i32::from(!is_pdf),
                );
                candidate
                    .metadata
                    .insert("has_license".to_string(), has_license.to_string());
                if candidates.iter().all(|c: &UrlCandidate| c.url != link_url) {
                    candidates.push(candidate);
                }
            }
        }

        // The resolver hop is always available as a late fallback.
        let mut resolver = UrlCandidate::new(
            format!("https://doi.org/{doi}"),
            self.name(),
            crate::classify::UrlType::DoiResolver,
            self.base_priority() + 5,
        );
        resolver
            .metadata
            .insert("has_license".to_string(), has_license.to_string());
        candidates.push(resolver);

        logfmt::log_event(
            Status::Ok,
            "crossref",
            "work links fetched",
            &[
                ("doi", doi),
                ("candidates", &candidates.len().to_string()),
                ("licensed", &has_license.to_string()),
            ],
        );
        Ok(candidates)
    }
}

impl std::fmt::Debug for CrossrefClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
