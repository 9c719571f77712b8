//! PubMed Central direct-PDF routing.
//!
//! PMC exposes several stable PDF paths per article; all four are emitted as
//! candidates so the download waterfall can fall through host variants. PMC
//! is known to 403 programmatic clients, which the waterfall records as
//! blocked and the URL collection stage compensates for (OpenAlex fallback).

use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::UrlType;
use crate::config::EnrichConfig;
use crate::ident::PubIds;

use super::rate_limit::RateLimiter;
use super::{PubRef, SourceClient, SourceResult, UrlCandidate, UrlSource};

/// Candidate URL templates keyed by a PMCID, in preference order.
fn pdf_patterns(pmcid: &str) -> [String; 4] {
    [
        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/pdf/"),
        format!("https://pmc.ncbi.nlm.nih.gov/articles/{pmcid}/pdf/"),
        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/pdf/main.pdf"),
        format!("https://europepmc.org/articles/{pmcid}?pdf=render"),
    ]
}

/// Pattern-based PMC URL source.
///
/// Produces candidates without network traffic; the PMCID either came from
/// discovery metadata or a PubMed elink lookup.
#[derive(Debug)]
pub struct PmcClient {
    _limiter: Arc<RateLimiter>,
}

impl PmcClient {
    /// Creates the client; PMC emits pattern candidates only.
    #[must_use]
    pub fn new(_config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self { _limiter: limiter }
    }
}

impl SourceClient for PmcClient {
    fn name(&self) -> &'static str {
        "pmc"
    }

    fn base_priority(&self) -> i32 {
        10
    }
}

#[async_trait]
impl UrlSource for PmcClient {
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        Ok(candidates_for_ids(
            &publication.ids,
            self.name(),
            self.base_priority(),
        ))
    }
}

fn candidates_for_ids(ids: &PubIds, source: &str, base_priority: i32) -> Vec<UrlCandidate> {
    let Some(pmcid) = &ids.pmcid else {
        return Vec::new();
    };

    let mut candidates: Vec<UrlCandidate> = pdf_patterns(pmcid)
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let offset = i32::try_from(i).unwrap_or(i32::MAX);
            UrlCandidate::new(url, source, UrlType::DirectPdf, base_priority + offset)
        })
        .collect();

    candidates.push(UrlCandidate::new(
        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/"),
        source,
        UrlType::HtmlFulltext,
        base_priority + 5,
    ));

    candidates
}
