//! Sci-Hub last-resort routing. Constructed only when explicitly enabled.

use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::UrlType;
use crate::config::EnrichConfig;

use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_MIRROR: &str = "https://sci-hub.se";

/// Sci-Hub URL source; emits one landing-page candidate per DOI.
#[derive(Debug)]
pub struct ScihubClient {
    mirror: String,
    _limiter: Arc<RateLimiter>,
}

impl ScihubClient {
    /// Creates the client against the default mirror.
    #[must_use]
    pub fn new(_config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            mirror: DEFAULT_MIRROR.to_string(),
            _limiter: limiter,
        }
    }
}

impl SourceClient for ScihubClient {
    fn name(&self) -> &'static str {
        "scihub"
    }

    fn base_priority(&self) -> i32 {
        80
    }
}

#[async_trait]
impl UrlSource for ScihubClient {
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };
        let mut candidate = UrlCandidate::new(
            format!("{}/{doi}", self.mirror),
            self.name(),
            UrlType::LandingPage,
            self.base_priority(),
        );
        candidate.confidence = 0.3;
        Ok(vec![candidate])
    }
}
