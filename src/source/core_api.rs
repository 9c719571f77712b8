//! CORE aggregator repository lookup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::classify;
use crate::config::EnrichConfig;

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceError, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3";

/// CORE client; repository-hosted PDF discovery.
pub struct CoreClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl CoreClient {
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

impl SourceClient for CoreClient {
    fn name(&self) -> &'static str {
        "core"
    }

    fn base_priority(&self) -> i32 {
        45
    }
}

#[async_trait]
impl UrlSource for CoreClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };

        let url = format!("{}/discover", self.base_url);
        let payload = serde_json::json!({ "doi": doi });
        let response = send_with_retry(&self.limiter, "core", || {
            self.client.post(&url).json(&payload)
        })
        .await?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("core body: {e}")))?;

        let Some(full_text_link) = body["fullTextLink"].as_str() else {
            return Ok(Vec::new());
        };

        Ok(vec![UrlCandidate::new(
            full_text_link,
            self.name(),
            classify::classify(full_text_link),
            self.base_priority(),
        )])
    }
}

impl std::fmt::Debug for CoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::PubIds;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_urls_discover_hit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/discover"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fullTextLink": "https://repository.example.edu/bitstream/1/paper.pdf"
            })))
            .mount(&server)
            .await;

        let config = EnrichConfig::default();
        let client = CoreClient::with_base_url(
            &config,
            Arc::new(RateLimiter::new(std::time::Duration::from_millis(1))),
            server.uri(),
        );
        let ids = PubIds::sanitized(None, None, Some("10.1/x"), None);

        let candidates = client.fetch_urls(&PubRef::from_ids(ids)).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].url_type,
            crate::classify::UrlType::DirectPdf
        );
    }

    #[tokio::test]
    async fn test_fetch_urls_discover_miss() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let config = EnrichConfig::default();
        let client = CoreClient::with_base_url(
            &config,
            Arc::new(RateLimiter::new(std::time::Duration::from_millis(1))),
            server.uri(),
        );
        let ids = PubIds::sanitized(None, None, Some("10.1/x"), None);
        assert!(client.fetch_urls(&PubRef::from_ids(ids)).await.unwrap().is_empty());
    }
}
