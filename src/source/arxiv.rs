//! arXiv preprint routing.
//!
//! arXiv PDF URLs are derivable from the identifier alone, so this client
//! emits pattern candidates without network traffic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::UrlType;
use crate::config::EnrichConfig;

use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceResult, UrlCandidate, UrlSource};

/// arXiv URL source.
#[derive(Debug)]
pub struct ArxivClient {
    _limiter: Arc<RateLimiter>,
}

impl ArxivClient {
    /// Creates the client; arXiv emits pattern candidates only.
    #[must_use]
    pub fn new(_config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self { _limiter: limiter }
    }
}

impl SourceClient for ArxivClient {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn base_priority(&self) -> i32 {
        12
    }
}

#[async_trait]
impl UrlSource for ArxivClient {
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        // arXiv DOIs (10.48550/arXiv.<id>) also carry the identifier.
        let arxiv_id = publication.ids.arxiv_id.clone().or_else(|| {
            publication
                .ids
                .doi
                .as_deref()
                .and_then(|doi| doi.strip_prefix("10.48550/arXiv."))
                .map(String::from)
        });
        let Some(id) = arxiv_id else {
            return Ok(Vec::new());
        };

        let mut pdf = UrlCandidate::new(
            format!("https://arxiv.org/pdf/{id}"),
            self.name(),
            UrlType::DirectPdf,
            self.base_priority(),
        );
        pdf.confidence = 0.9;

        let abs = UrlCandidate::new(
            format!("https://arxiv.org/abs/{id}"),
            self.name(),
            UrlType::LandingPage,
            self.base_priority() + 5,
        );

        Ok(vec![pdf, abs])
    }
}
