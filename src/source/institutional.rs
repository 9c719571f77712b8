//! Institutional proxy routing.
//!
//! Wraps the DOI resolver in the operator's EZproxy-style prefix. Off by
//! default; every emitted candidate carries `requires_auth` so the waterfall
//! skips it unless institutional mode is on.

use async_trait::async_trait;
use thiserror::Error;

use crate::classify::UrlType;
use crate::config::EnrichConfig;

use super::{PubRef, SourceClient, SourceResult, UrlCandidate, UrlSource};

/// Errors constructing the institutional client.
#[derive(Debug, Error)]
pub enum InstitutionalError {
    /// Institutional mode is on but no proxy prefix is configured.
    #[error("institutional access enabled without a proxy prefix")]
    MissingProxyPrefix,
}

/// Proxy-wrapped DOI source.
#[derive(Debug)]
pub struct InstitutionalClient {
    proxy_prefix: String,
}

impl InstitutionalClient {
    /// Creates the client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InstitutionalError::MissingProxyPrefix`] when no prefix is
    /// configured.
    pub fn new(config: &EnrichConfig) -> Result<Self, InstitutionalError> {
        let proxy_prefix = config
            .institutional_proxy_prefix
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or(InstitutionalError::MissingProxyPrefix)?;
        Ok(Self {
            proxy_prefix: proxy_prefix.trim_end_matches('/').to_string(),
        })
    }
}

impl SourceClient for InstitutionalClient {
    fn name(&self) -> &'static str {
        "institutional"
    }

    fn base_priority(&self) -> i32 {
        60
    }
}

#[async_trait]
impl UrlSource for InstitutionalClient {
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(doi) = &publication.ids.doi else {
            return Ok(Vec::new());
        };

        let mut candidate = UrlCandidate::new(
            format!("{}/login?url=https://doi.org/{doi}", self.proxy_prefix),
            self.name(),
            UrlType::DoiResolver,
            self.base_priority(),
        );
        candidate.requires_auth = true;
        Ok(vec![candidate])
    }
}
