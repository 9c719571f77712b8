//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   efetch:            publication metadata (XML)
//!   esearch/esummary:  GEO series metadata via the gds database (JSON)
//!   elink:             citing-article and PMC id resolution (JSON)

use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, instrument, warn};

use crate::classify::UrlType;
use crate::config::EnrichConfig;
use crate::ident::PubIds;
use crate::logfmt::{self, Status};

use super::http::{send_with_retry, standard_client};
use super::rate_limit::RateLimiter;
use super::{
    CitationRecord, CitationSource, PubRef, SourceClient, SourceError, SourceResult, UrlCandidate,
    UrlSource,
};

const DEFAULT_EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Cap on citing PMIDs hydrated per publication in one pass.
const MAX_CITING_FETCH: usize = 100;

/// GEO series metadata as reported by the `gds` E-Summary record.
#[derive(Debug, Clone, Default)]
pub struct GeoSummary {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<i64>,
    pub publication_date: Option<String>,
    pub pubmed_ids: Vec<String>,
}

/// E-utilities client covering metadata, citations, and PMC link routing.
pub struct PubMedClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    api_key: Option<String>,
    contact_email: String,
}

impl PubMedClient {
    /// Creates a client against the production E-utilities endpoints.
    #[must_use]
    pub fn new(config: &EnrichConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(config, limiter, DEFAULT_EUTILS_BASE_URL)
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
            api_key: config.ncbi_api_key.clone(),
            contact_email: config.ncbi_contact_email.clone(),
        }
    }

    fn base_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tool", "geolit".to_string()),
            ("email", self.contact_email.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Fetches full publication metadata for one PMID.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] when the PMID is unknown, or the
    /// transport error otherwise.
    #[instrument(skip(self))]
    pub async fn fetch_publication(&self, pmid: &str) -> SourceResult<CitationRecord> {
        let records = self.efetch(&[pmid.to_string()]).await?;
        records.into_iter().next().ok_or(SourceError::NotFound)
    }

    /// Fetches GEO series metadata via the `gds` E-utilities database.
    ///
    /// Resolves the accession to a UID with esearch, then reads the summary
    /// record. This is both the registry seed and the authoritative organism
    /// backfill when GEO metadata arrives incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] for unknown accessions, or the
    /// transport error otherwise.
    #[instrument(skip(self))]
    pub async fn fetch_geo_summary(&self, geo_id: &str) -> SourceResult<GeoSummary> {
        let search_url = format!("{}/esearch.fcgi", self.base_url);
        let mut params = self.base_params();
        params.push(("db", "gds".to_string()));
        params.push(("term", format!("{geo_id}[ACCN]")));
        params.push(("retmode", "json".to_string()));

        let response = send_with_retry(&self.limiter, "pubmed", || {
            self.client.get(&search_url).query(&params)
        })
        .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("esearch body: {e}")))?;

        let uid = body["esearchresult"]["idlist"]
            .as_array()
            .and_then(|ids| ids.first())
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or(SourceError::NotFound)?;

        let summary_url = format!("{}/esummary.fcgi", self.base_url);
        let mut params = self.base_params();
        params.push(("db", "gds".to_string()));
        params.push(("id", uid.clone()));
        params.push(("retmode", "json".to_string()));

        let response = send_with_retry(&self.limiter, "pubmed", || {
            self.client.get(&summary_url).query(&params)
        })
        .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("esummary body: {e}")))?;

        let doc = &body["result"][&uid];
        if doc.is_null() {
            return Err(SourceError::NotFound);
        }

        Ok(GeoSummary {
            title: doc["title"].as_str().map(String::from),
            summary: doc["summary"].as_str().map(String::from),
            organism: doc["taxon"].as_str().map(String::from),
            platform: doc["gpl"].as_str().map(|g| format!("GPL{g}")),
            sample_count: doc["n_samples"].as_i64(),
            publication_date: doc["pdat"].as_str().map(String::from),
            pubmed_ids: doc["pubmedids"]
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| match v {
                            serde_json::Value::String(s) => Some(s.clone()),
                            serde_json::Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Fetches metadata for a batch of PMIDs via efetch (XML).
    async fn efetch(&self, pmids: &[String]) -> SourceResult<Vec<CitationRecord>> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/efetch.fcgi", self.base_url);
        let mut params = self.base_params();
        params.push(("db", "pubmed".to_string()));
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let response = send_with_retry(&self.limiter, "pubmed", || {
            self.client.get(&url).query(&params)
        })
        .await?;
        let xml = response
            .text()
            .await
            .map_err(|e| SourceError::Transient(format!("efetch body: {e}")))?;

        Ok(parse_pubmed_xml(&xml))
    }

    /// Resolves linked ids (citing PMIDs or PMC ids) via elink.
    async fn elink_ids(&self, pmid: &str, linkname: &str) -> SourceResult<Vec<String>> {
        let url = format!("{}/elink.fcgi", self.base_url);
        let mut params = self.base_params();
        params.push(("dbfrom", "pubmed".to_string()));
        params.push(("linkname", linkname.to_string()));
        params.push(("id", pmid.to_string()));
        params.push(("retmode", "json".to_string()));

        let response = send_with_retry(&self.limiter, "pubmed", || {
            self.client.get(&url).query(&params)
        })
        .await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SourceError::Transient(format!("elink body: {e}")))?;

        let mut ids = Vec::new();
        if let Some(linksets) = body["linksets"].as_array() {
            for linkset in linksets {
                let Some(dbs) = linkset["linksetdbs"].as_array() else {
                    continue;
                };
                for db in dbs {
                    if db["linkname"].as_str() == Some(linkname)
                        && let Some(links) = db["links"].as_array()
                    {
                        ids.extend(links.iter().filter_map(|v| v.as_str().map(String::from)));
                    }
                }
            }
        }
        debug!(pmid, linkname, count = ids.len(), "elink resolved");
        Ok(ids)
    }
}

impl SourceClient for PubMedClient {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    fn base_priority(&self) -> i32 {
        25
    }
}

#[async_trait]
impl CitationSource for PubMedClient {
    #[instrument(skip(self, ids))]
    async fn fetch_citations(&self, ids: &PubIds) -> SourceResult<Vec<CitationRecord>> {
        let Some(pmid) = &ids.pmid else {
            return Ok(Vec::new());
        };

        let mut citing = self.elink_ids(pmid, "pubmed_pubmed_citedin").await?;
        citing.truncate(MAX_CITING_FETCH);
        let records = self.efetch(&citing).await?;

        logfmt::log_event(
            Status::Ok,
            "pubmed",
            "citing articles fetched",
            &[("pmid", pmid), ("count", &records.len().to_string())],
        );
        Ok(records)
    }
}

#[async_trait]
impl UrlSource for PubMedClient {
    #[instrument(skip(self, publication))]
    async fn fetch_urls(&self, publication: &PubRef) -> SourceResult<Vec<UrlCandidate>> {
        let Some(pmid) = &publication.ids.pmid else {
            return Ok(Vec::new());
        };

        let mut candidates = Vec::new();

        // PMC membership yields both an article page and a PDF path.
        match self.elink_ids(pmid, "pubmed_pmc").await {
            Ok(pmc_ids) => {
                if let Some(pmc_numeric) = pmc_ids.first() {
                    let pmcid = format!("PMC{pmc_numeric}");
                    candidates.push(UrlCandidate::new(
                        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/pdf/"),
                        self.name(),
                        UrlType::DirectPdf,
                        self.base_priority(),
                    ));
                    candidates.push(UrlCandidate::new(
                        format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmcid}/"),
                        self.name(),
                        UrlType::HtmlFulltext,
                        self.base_priority(),
                    ));
                }
            }
            Err(error) => {
                warn!(pmid, error = %error, "PMC link resolution failed; falling back to abstract page");
            }
        }

        candidates.push(UrlCandidate::new(
            format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
            self.name(),
            UrlType::LandingPage,
            self.base_priority() + 10,
        ));

        Ok(candidates)
    }
}

impl std::fmt::Debug for PubMedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubMedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Parses efetch abstract-mode XML into citation records.
///
/// Walks the `<PubmedArticleSet><PubmedArticle>` structure with an event
/// reader; articles without a title are dropped.
fn parse_pubmed_xml(xml: &str) -> Vec<CitationRecord> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<CitationRecord> = None;
    let mut path: Vec<String> = Vec::new();
    let mut last_name = String::new();
    let mut fore_name = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "PubmedArticle" {
                    current = Some(CitationRecord::default());
                    last_name.clear();
                    fore_name.clear();
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                let Some(record) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                match path.last().map(String::as_str) {
                    // The first PMID under MedlineCitation identifies the article;
                    // later PMIDs (references, comments) must not overwrite it.
                    Some("PMID") if record.ids.pmid.is_none() && in_medline_citation(&path) => {
                        record.ids.pmid = Some(text);
                    }
                    Some("ArticleTitle") => record.title.push_str(&text),
                    Some("AbstractText") => {
                        let existing = record.abstract_text.get_or_insert_with(String::new);
                        if !existing.is_empty() {
                            existing.push(' ');
                        }
                        existing.push_str(&text);
                    }
                    Some("LastName") => last_name = text,
                    Some("ForeName") => fore_name = text,
                    Some("Title") if path.iter().any(|p| p == "Journal") => {
                        record.journal = Some(text);
                    }
                    Some("Year") if path.iter().any(|p| p == "PubDate") => {
                        record.year = text.parse().ok();
                    }
                    Some("ArticleId") => {
                        if crate::ident::is_doi(&text) {
                            record.ids.doi.get_or_insert(text);
                        } else if crate::ident::is_pmcid(&text) {
                            record.ids.pmcid.get_or_insert(text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "Author" {
                    if let Some(record) = current.as_mut()
                        && !last_name.is_empty()
                    {
                        let author = if fore_name.is_empty() {
                            last_name.clone()
                        } else {
                            format!("{fore_name} {last_name}")
                        };
                        record.authors.push(author);
                    }
                    last_name.clear();
                    fore_name.clear();
                } else if name == "PubmedArticle" {
                    if let Some(record) = current.take() {
                        if record.title.is_empty() {
                            warn!("skipping PubMed article with empty title");
                        } else {
                            records.push(record);
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "PubMed XML parse error; returning partial results");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    records
}

fn in_medline_citation(path: &[String]) -> bool {
    path.iter().any(|p| p == "MedlineCitation")
}
