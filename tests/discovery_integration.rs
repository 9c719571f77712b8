//! Integration tests for citation discovery (P1) against mock sources.

use std::sync::Arc;
use std::time::Duration;

use geolit_core::config::EnrichConfig;
use geolit_core::discovery::CitationDiscovery;
use geolit_core::source::{
    CitationSource, EuropePmcClient, OpenAlexClient, OpenCitationsClient, PubMedClient,
    RateLimiter, SourceRegistry, UrlSource,
};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(Duration::from_millis(1)))
}

/// Registry with PubMed, OpenAlex, Europe PMC, and OpenCitations pointed at
/// one mock server.
fn registry_for(server: &MockServer) -> Arc<SourceRegistry> {
    let config = EnrichConfig::default();
    let pubmed = Arc::new(PubMedClient::with_base_url(&config, limiter(), server.uri()));
    let openalex = Arc::new(OpenAlexClient::with_base_url(&config, limiter(), server.uri()));
    let europepmc = Arc::new(EuropePmcClient::with_base_url(&config, limiter(), server.uri()));
    let opencitations = Arc::new(OpenCitationsClient::with_base_url(
        &config,
        limiter(),
        server.uri(),
    ));

    let citation_sources: Vec<Arc<dyn CitationSource>> = vec![
        Arc::clone(&openalex) as Arc<dyn CitationSource>,
        europepmc,
        opencitations,
        Arc::clone(&pubmed) as Arc<dyn CitationSource>,
    ];
    let url_sources: Vec<Arc<dyn UrlSource>> = Vec::new();

    Arc::new(SourceRegistry::from_parts(
        citation_sources,
        url_sources,
        pubmed,
        openalex,
    ))
}

const ORIGINAL_XML: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>25186741</PMID>
      <Article>
        <Journal><Title>The Journal of Neuroscience</Title>
          <JournalIssue><PubDate><Year>2014</Year></PubDate></JournalIssue>
        </Journal>
        <ArticleTitle>An RNA-sequencing transcriptome of glia and neurons</ArticleTitle>
        <Abstract><AbstractText>A long abstract describing purified cell-type profiling in detail.</AbstractText></Abstract>
        <AuthorList><Author><LastName>Zhang</LastName><ForeName>Ye</ForeName></Author></AuthorList>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="doi">10.1523/JNEUROSCI.1860-14.2014</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

async fn mount_pubmed_original(server: &MockServer) {
    // efetch for the originating PMID.
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .and(query_param("id", "25186741"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ORIGINAL_XML))
        .mount(server)
        .await;
    // No PubMed-side citing articles.
    Mock::given(method("GET"))
        .and(path("/elink.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "linksets": []
        })))
        .mount(server)
        .await;
}

async fn mount_openalex_citing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/works/(doi|pmid):.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "https://openalex.org/W100",
            "title": "An RNA-sequencing transcriptome of glia and neurons"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                {
                    "id": "https://openalex.org/W200",
                    "title": "A citing paper about astrocytes",
                    "doi": "https://doi.org/10.1000/citing.1",
                    "ids": {"pmid": "https://pubmed.ncbi.nlm.nih.gov/30000001"},
                    "publication_year": 2019,
                    "cited_by_count": 12,
                    "authorships": [{"author": {"display_name": "A. Author"}}],
                    "primary_location": {"source": {"display_name": "Glia"}}
                },
                {
                    "id": "https://openalex.org/W201",
                    "title": "Another citing paper",
                    "doi": "https://doi.org/10.1000/citing.2",
                    "ids": {},
                    "publication_year": 2021,
                    "cited_by_count": 3,
                    "authorships": [],
                    "primary_location": {"source": {"display_name": "Neuron"}}
                }
            ]
        })))
        .mount(server)
        .await;
}

/// Europe PMC sees one of the same citing papers (a duplicate) plus the
/// same identifiers under MED ids.
async fn mount_europepmc_duplicate(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/MED/25186741/citations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "citationList": {"citation": [
                {
                    "id": "30000001",
                    "source": "MED",
                    "title": "A citing paper about astrocytes",
                    "authorString": "Author A",
                    "journalAbbreviation": "Glia",
                    "pubYear": 2019,
                    "citedByCount": 12
                }
            ]}
        })))
        .mount(server)
        .await;
}

async fn mount_opencitations_empty(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/citations/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_discover_merges_and_dedupes_across_sources() {
    let server = MockServer::start().await;
    mount_pubmed_original(&server).await;
    mount_openalex_citing(&server).await;
    mount_europepmc_duplicate(&server).await;
    mount_opencitations_empty(&server).await;

    let discovery = CitationDiscovery::new(registry_for(&server), Duration::from_secs(5));
    let result = discovery.discover(&["25186741".to_string()]).await;

    assert_eq!(result.original.len(), 1);
    assert_eq!(
        result.original[0].record.ids.pmid.as_deref(),
        Some("25186741")
    );

    // OpenAlex returned 2, Europe PMC returned 1 duplicate of one of them.
    assert_eq!(result.citing.len(), 2, "duplicate must merge");
    assert!(result.metrics.duplicate_rate > 0.0);
    assert_eq!(result.metrics.total_raw, 3);

    // Provenance: the first source in fan-out order wins.
    let shared = result
        .citing
        .iter()
        .find(|p| p.record.ids.pmid.as_deref() == Some("30000001"))
        .expect("merged publication present");
    assert_eq!(shared.discovery_source, "openalex");
    assert_eq!(shared.record.ids.doi.as_deref(), Some("10.1000/citing.1"));
}

#[tokio::test]
async fn test_discover_source_contributions_tracked() {
    let server = MockServer::start().await;
    mount_pubmed_original(&server).await;
    mount_openalex_citing(&server).await;
    mount_europepmc_duplicate(&server).await;
    mount_opencitations_empty(&server).await;

    let discovery = CitationDiscovery::new(registry_for(&server), Duration::from_secs(5));
    let result = discovery.discover(&["25186741".to_string()]).await;

    assert_eq!(result.source_contributions.get("openalex"), Some(&2));
    assert_eq!(result.source_contributions.get("europepmc"), None);
}

#[tokio::test]
async fn test_discover_partial_when_a_source_fails() {
    let server = MockServer::start().await;
    mount_pubmed_original(&server).await;
    mount_openalex_citing(&server).await;
    // Europe PMC is down hard; OpenCitations is empty.
    Mock::given(method("GET"))
        .and(path("/MED/25186741/citations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_opencitations_empty(&server).await;

    let discovery = CitationDiscovery::new(registry_for(&server), Duration::from_secs(5));
    let result = discovery.discover(&["25186741".to_string()]).await;

    assert_eq!(result.original.len(), 1, "originals unaffected");
    assert_eq!(result.citing.len(), 2, "surviving sources still contribute");
}

#[tokio::test]
async fn test_discover_unknown_pmid_yields_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r"<PubmedArticleSet></PubmedArticleSet>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/elink.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"linksets": []})))
        .mount(&server)
        .await;

    let discovery = CitationDiscovery::new(registry_for(&server), Duration::from_secs(5));
    let result = discovery.discover(&["99999999".to_string()]).await;

    assert!(result.original.is_empty());
    assert!(result.citing.is_empty());
    assert!(!result.has_citing());
}
