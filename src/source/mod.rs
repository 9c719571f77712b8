//! Bibliographic source clients.
//!
//! Each provider (PubMed, PMC, Unpaywall, OpenAlex, ...) is a small client
//! over a pooled HTTP transport, implementing the capability traits it
//! actually supports:
//!
//! - [`CitationSource`] - returns publications citing a given paper (P1)
//! - [`UrlSource`] - returns candidate full-text URLs for a paper (P2)
//!
//! Clients never abort a batch: every failure maps onto [`SourceError`] and
//! is folded into a per-source status by the callers. The
//! [`SourceRegistry`] assembles the enabled clients from configuration.

mod arxiv;
mod biorxiv;
mod core_api;
mod crossref;
mod europepmc;
mod http;
mod institutional;
mod libgen;
mod openalex;
mod opencitations;
mod pmc;
mod pubmed;
mod rate_limit;
mod scihub;
mod semantic_scholar;
mod unpaywall;

pub use arxiv::ArxivClient;
pub use biorxiv::BiorxivClient;
pub use core_api::CoreClient;
pub use crossref::CrossrefClient;
pub use europepmc::EuropePmcClient;
pub use http::{build_source_http_client, source_user_agent};
pub use institutional::InstitutionalClient;
pub use libgen::LibgenClient;
pub use openalex::OpenAlexClient;
pub use opencitations::OpenCitationsClient;
pub use pmc::PmcClient;
pub use pubmed::{GeoSummary, PubMedClient};
pub use rate_limit::{RateLimiter, parse_retry_after};
pub use scihub::ScihubClient;
pub use semantic_scholar::SemanticScholarClient;
pub use unpaywall::UnpaywallClient;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::classify::UrlType;
use crate::config::EnrichConfig;
use crate::ident::PubIds;

/// Errors every source operation maps onto.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source is disabled by configuration.
    #[error("source disabled by configuration")]
    Disabled,

    /// The identifier is unknown to this source (terminal, not retried).
    #[error("not found")]
    NotFound,

    /// The source is throttling us; `retry_after` carries the raw header.
    #[error("rate limited")]
    RateLimited {
        /// Raw `Retry-After` header value when the server sent one.
        retry_after: Option<String>,
    },

    /// Temporary failure (5xx, network, timeout); retried once.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The source refuses programmatic access (403 and kin).
    #[error("permanently denied: {0}")]
    PermanentDenied(String),
}

impl SourceError {
    /// Folds an HTTP status into the error taxonomy.
    #[must_use]
    pub fn from_status(status: u16, retry_after: Option<String>) -> Self {
        match status {
            404 | 410 => Self::NotFound,
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::PermanentDenied(format!("HTTP {status}")),
            s if (500..600).contains(&s) => Self::Transient(format!("HTTP {s}")),
            s => Self::PermanentDenied(format!("HTTP {s}")),
        }
    }

    /// True when one retry is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// Result alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// A publication as reported by a citation source, before merge/dedupe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationRecord {
    pub ids: PubIds,
    pub title: String,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
    pub citation_count: Option<i64>,
}

/// A candidate full-text URL produced by a URL source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCandidate {
    pub url: String,
    pub source: String,
    pub url_type: UrlType,
    /// Lower is tried first; the classifier boost is already applied by P2.
    pub priority: i32,
    pub confidence: f64,
    pub requires_auth: bool,
    pub metadata: HashMap<String, String>,
}

impl UrlCandidate {
    /// Creates a candidate with defaults for the optional fields.
    #[must_use]
    pub fn new(url: impl Into<String>, source: &str, url_type: UrlType, priority: i32) -> Self {
        Self {
            url: url.into(),
            source: source.to_string(),
            url_type,
            priority,
            confidence: 0.5,
            requires_auth: false,
            metadata: HashMap::new(),
        }
    }
}

/// Minimal publication view handed to URL sources.
#[derive(Debug, Clone, Default)]
pub struct PubRef {
    pub ids: PubIds,
    pub title: Option<String>,
    pub year: Option<i32>,
}

impl PubRef {
    /// Builds a reference from an id set alone.
    #[must_use]
    pub fn from_ids(ids: PubIds) -> Self {
        Self {
            ids,
            title: None,
            year: None,
        }
    }
}

/// Base contract shared by every source client.
pub trait SourceClient: Send + Sync {
    /// Stable lowercase source name used in logs, statuses, and the registry.
    fn name(&self) -> &'static str;

    /// Base priority for candidates from this source (lower = earlier).
    fn base_priority(&self) -> i32 {
        50
    }
}

/// Capability: lists publications citing a given paper.
#[async_trait]
pub trait CitationSource: SourceClient {
    /// Returns the citing publications for the paper identified by `ids`.
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>>;
}

/// Capability: produces candidate full-text URLs for a paper.
#[async_trait]
pub trait UrlSource: SourceClient {
    /// Returns candidate URLs, best guesses first.
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>>;
}

/// The set of enabled source clients, assembled from configuration.
pub struct SourceRegistry {
    citation_sources: Vec<Arc<dyn CitationSource>>,
    url_sources: Vec<Arc<dyn UrlSource>>,
    pubmed: Arc<PubMedClient>,
    openalex: Arc<OpenAlexClient>,
}

impl SourceRegistry {
    /// Builds the default registry for the given configuration.
    ///
    /// Order is deterministic: citation sources in configured fan-out order,
    /// URL sources by ascending base priority. Sources that fail to
    /// construct are skipped with a warning so one bad client never
    /// disables the rest.
    #[must_use]
    pub fn from_config(config: &EnrichConfig) -> Self {
        let limiter = Arc::new(RateLimiter::for_config(config));

        let pubmed = Arc::new(PubMedClient::new(config, Arc::clone(&limiter)));
        let openalex = Arc::new(OpenAlexClient::new(config, Arc::clone(&limiter)));

        let mut citation_sources: Vec<Arc<dyn CitationSource>> = vec![
            Arc::clone(&openalex) as Arc<dyn CitationSource>,
            Arc::new(SemanticScholarClient::new(config, Arc::clone(&limiter))),
            Arc::new(EuropePmcClient::new(config, Arc::clone(&limiter))),
            Arc::new(OpenCitationsClient::new(config, Arc::clone(&limiter))),
        ];
        citation_sources.push(Arc::clone(&pubmed) as Arc<dyn CitationSource>);

        let mut url_sources: Vec<Arc<dyn UrlSource>> = vec![
            Arc::new(ArxivClient::new(config, Arc::clone(&limiter))),
            Arc::new(BiorxivClient::new(config, Arc::clone(&limiter))),
            Arc::clone(&pubmed) as Arc<dyn UrlSource>,
            Arc::clone(&openalex) as Arc<dyn UrlSource>,
            Arc::new(CrossrefClient::new(config, Arc::clone(&limiter))),
            Arc::new(CoreClient::new(config, Arc::clone(&limiter))),
        ];

        if config.enable_pmc {
            url_sources.push(Arc::new(PmcClient::new(config, Arc::clone(&limiter))));
        }
        if config.enable_unpaywall {
            url_sources.push(Arc::new(UnpaywallClient::new(config, Arc::clone(&limiter))));
        }
        if config.enable_institutional {
            match InstitutionalClient::new(config) {
                Ok(client) => url_sources.push(Arc::new(client)),
                Err(error) => warn!(
                    error = %error,
                    "institutional access client unavailable; continuing without it"
                ),
            }
        }
        if config.enable_scihub {
            url_sources.push(Arc::new(ScihubClient::new(config, Arc::clone(&limiter))));
            url_sources.push(Arc::new(LibgenClient::new(config, Arc::clone(&limiter))));
        }

        url_sources.sort_by_key(|s| s.base_priority());

        Self {
            citation_sources,
            url_sources,
            pubmed,
            openalex,
        }
    }

    /// Assembles a registry from explicit parts.
    ///
    /// Integration tests use this to point every client at a mock server;
    /// production goes through [`SourceRegistry::from_config`].
    #[must_use]
    pub fn from_parts(
        citation_sources: Vec<Arc<dyn CitationSource>>,
        url_sources: Vec<Arc<dyn UrlSource>>,
        pubmed: Arc<PubMedClient>,
        openalex: Arc<OpenAlexClient>,
    ) -> Self {
        Self {
            citation_sources,
            url_sources,
            pubmed,
            openalex,
        }
    }

    /// The enabled citation-capable sources, in fan-out order.
    #[must_use]
    pub fn citation_sources(&self) -> &[Arc<dyn CitationSource>] {
        &self.citation_sources
    }

    /// The enabled URL sources, by ascending base priority.
    #[must_use]
    pub fn url_sources(&self) -> &[Arc<dyn UrlSource>] {
        &self.url_sources
    }

    /// Direct handle on the PubMed client for metadata lookups (P1).
    #[must_use]
    pub fn pubmed(&self) -> &Arc<PubMedClient> {
        &self.pubmed
    }

    /// Direct handle on OpenAlex for the blocked-PMC fallback (P2).
    #[must_use]
    pub fn openalex(&self) -> &Arc<OpenAlexClient> {
        &self.openalex
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field(
                "citation_sources",
                &self
                    .citation_sources
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>(),
            )
            .field(
                "url_sources",
                &self
                    .url_sources
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
