//! Library Genesis last-resort routing. Constructed only when explicitly
//! enabled, after Sci-Hub in the candidate order.

use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::UrlType;
use crate::config::EnrichConfig;

use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceResult, UrlCandidate, UrlSource};

const DEFAULT_MIRROR: &str = "https://libgen.rs";

/// LibGen URL source; emits one scimag search candidate per DOI.
#[derive(Debug)]
pub struct LibgenClient {
    mirror: String,
    _limiter: Arc<RateLimiter>,
}

impl LibgenClient {
    /// Creates the client against the default mirror.
    #[must_use]
    pub fn new(_config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            mirror: DEFAULT_MIRROR.to_string(),
            _limiter: limiter,
        }
    }
}

impl SourceClient for LibgenClient {
    fn name(&self) -> &'static str {
        "libgen"
    }

    fn base_priority(&self) -> i32 {
        85
    }
}

#[async_trait]
impl UrlSource for LibgenClient {
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };
        let mut candidate = UrlCandidate::new(
            format!("{}/scimag/?q={doi}", self.mirror),
            self.name(),
            UrlType::LandingPage,
            self.base_priority(),
        );
        candidate.confidence = 0.2;
        Ok(vec![candidate])
    }
}
