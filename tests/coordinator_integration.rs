//! End-to-end coordinator tests: the completeness ladder, idempotency,
//! backoff deferral, resumability, and shared-publication dedupe.

use std::sync::Arc;
use std::time::Duration;

use geolit_core::cache::{HotCache, LayeredCache, SoftCache, WarmStore};
use geolit_core::config::EnrichConfig;
use geolit_core::download::{DownloadManager, PdfFetcher};
use geolit_core::fulltext::PmcBlocklist;
use geolit_core::pipeline::{Coordinator, DatasetSeed, StageSkip};
use geolit_core::registry::{CompletenessLevel, Registry, Stage};
use geolit_core::source::{
    CitationSource, OpenAlexClient, PubMedClient, RateLimiter, SourceRegistry, UnpaywallClient,
    UrlSource,
};
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(Duration::from_millis(1)))
}

fn pdf_body() -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(4096, b'x');
    body
}

/// Wires a coordinator whose every outbound call lands on `server`.
async fn coordinator_for(server: &MockServer, root: &std::path::Path) -> Coordinator {
    let config = EnrichConfig {
        storage_root: root.to_path_buf(),
        ..EnrichConfig::default()
    };

    let pubmed = Arc::new(PubMedClient::with_base_url(&config, limiter(), server.uri()));
    let openalex = Arc::new(OpenAlexClient::with_base_url(&config, limiter(), server.uri()));
    let unpaywall = Arc::new(UnpaywallClient::with_base_url(&config, limiter(), server.uri()));

    let citation_sources: Vec<Arc<dyn CitationSource>> = vec![
        Arc::clone(&openalex) as Arc<dyn CitationSource>,
        Arc::clone(&pubmed) as Arc<dyn CitationSource>,
    ];
    let url_sources: Vec<Arc<dyn UrlSource>> = vec![unpaywall];
    let sources = Arc::new(SourceRegistry::from_parts(
        citation_sources,
        url_sources,
        pubmed,
        openalex,
    ));

    let registry = Registry::open_in_memory().await.unwrap();
    let cache = Arc::new(LayeredCache::new(
        Arc::new(HotCache::disabled()),
        Arc::new(WarmStore::new(root)),
        Arc::new(SoftCache::new(root)),
    ));
    let pmc_blocklist = Arc::new(PmcBlocklist::new());
    let downloads = DownloadManager::new(
        PdfFetcher::new("geolit-test/0.1", Duration::from_secs(5)),
        Arc::new(Semaphore::new(10)),
        Arc::clone(&pmc_blocklist),
        false,
    );

    Coordinator::new(config, registry, sources, cache, downloads, pmc_blocklist)
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
        <Abstract><AbstractText>Purified cell-type profiling in detail.</AbstractText></Abstract>
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

/// Mounts the full happy-path mock surface: GEO summary, originating
/// metadata, one citing paper, and a working OA PDF for both papers.
async fn mount_happy_path(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "esearchresult": {"idlist": ["200052564"]}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"200052564": {
                "title": "An RNA-Seq transcriptome of glia and vascular cells of the cerebral cortex",
                "summary": "Transcriptome atlas of purified brain cell types.",
                "taxon": "Mus musculus",
                "gpl": "13112",
                "n_samples": 17,
                "pdat": "2014/09/03",
                "pubmedids": ["25186741"]
            }}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .and(query_param("id", "25186741"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ORIGINAL_XML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/elink.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"linksets": []})))
        .mount(server)
        .await;

    // OpenAlex: resolve the original and report one citing work.
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
            "results": [{
                "id": "https://openalex.org/W200",
                "title": "A citing paper about astrocytes",
                "doi": "https://doi.org/10.1000/citing.1",
                "ids": {"pmid": "https://pubmed.ncbi.nlm.nih.gov/30000001"},
                "publication_year": 2019,
                "cited_by_count": 12,
                "authorships": [{"author": {"display_name": "A. Author"}}],
                "primary_location": {"source": {"display_name": "Glia"}}
            }]
        })))
        .mount(server)
        .await;

    // Unpaywall points every DOI at the mock PDF.
    let pdf_url = format!("{}/oa/paper.pdf", server.uri());
    Mock::given(method("GET"))
        .and(path_regex(r"^/10\..*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "best_oa_location": {"url_for_pdf": pdf_url}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oa/paper.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ladder_climbs_to_with_pdfs() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_for(&server, dir.path()).await;

    let outcome = coordinator
        .enrich_dataset(&DatasetSeed::bare("GSE52564"), CompletenessLevel::WithPdfs)
        .await
        .unwrap();

    assert_eq!(outcome.level, CompletenessLevel::WithPdfs);
    assert!(outcome.stopped.is_none());
    assert_eq!(
        outcome.stages_run,
        vec![Stage::Citations, Stage::Urls, Stage::Pdfs]
    );

    // The registry reflects everything: metadata backfill, links, files.
    let complete = coordinator
        .registry()
        .get_complete("GSE52564")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(complete.dataset.organism.as_deref(), Some("Mus musculus"));
    assert_eq!(complete.statistics.original, 1);
    assert_eq!(complete.statistics.citing, 1);
    assert_eq!(complete.statistics.successful_downloads, 2);
    assert!((complete.statistics.success_rate - 1.0).abs() < f64::EPSILON);

    // PDFs land in the dataset-partitioned layout.
    let pdf = dir
        .path()
        .join("pdfs/GSE52564/original/pmid-25186741.pdf");
    assert!(pdf.exists(), "missing {}", pdf.display());
}

#[tokio::test]
async fn test_rerun_at_achieved_level_runs_no_stage() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_for(&server, dir.path()).await;
    let seed = DatasetSeed::bare("GSE52564");

    coordinator
        .enrich_dataset(&seed, CompletenessLevel::WithPdfs)
        .await
        .unwrap();

    // Idempotent re-entry: nothing left to do, no stage executes.
    let second = coordinator
        .enrich_dataset(&seed, CompletenessLevel::WithPdfs)
        .await
        .unwrap();
    assert_eq!(second.level, CompletenessLevel::WithPdfs);
    assert!(second.stages_run.is_empty());
}

#[tokio::test]
async fn test_failed_stage_defers_with_backoff_and_freezes_lower_stages() {
    let server = MockServer::start().await;
    // GEO summary resolves, but discovery finds nothing at all.
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "esearchresult": {"idlist": []}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/efetch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<PubmedArticleSet></PubmedArticleSet>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/elink.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"linksets": []})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_for(&server, dir.path()).await;
    let seed = DatasetSeed {
        geo_id: "GSE1".to_string(),
        pubmed_ids: vec!["99999999".to_string()],
        ..DatasetSeed::default()
    };

    let outcome = coordinator
        .enrich_dataset(&seed, CompletenessLevel::FullyEnriched)
        .await
        .unwrap();
    assert_eq!(outcome.level, CompletenessLevel::MetadataOnly);
    assert!(matches!(
        outcome.stopped,
        Some(StageSkip::BackoffDeferred { stage: Stage::Citations, .. })
    ));

    // An immediate retry sits inside the 5-minute backoff rung: the stage
    // is skipped without any new stage work. (Metadata backfill may still
    // touch esearch/esummary; discovery endpoints must stay untouched.)
    let stage_requests = |requests: &[wiremock::Request]| {
        requests
            .iter()
            .filter(|r| {
                let p = r.url.path();
                p == "/efetch.fcgi" || p == "/elink.fcgi" || p.starts_with("/works")
            })
            .count()
    };
    let requests_before = stage_requests(&server.received_requests().await.unwrap());
    let retry = coordinator
        .enrich_dataset(&seed, CompletenessLevel::FullyEnriched)
        .await
        .unwrap();
    assert!(retry.stages_run.is_empty());
    assert!(matches!(
        retry.stopped,
        Some(StageSkip::BackoffDeferred { stage: Stage::Citations, .. })
    ));
    let requests_after = stage_requests(&server.received_requests().await.unwrap());
    assert_eq!(
        requests_before, requests_after,
        "deferred stage must issue zero outbound calls"
    );
}

#[tokio::test]
async fn test_invalid_accession_rejected_before_any_work() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_for(&server, dir.path()).await;

    let result = coordinator
        .enrich_dataset(&DatasetSeed::bare("GDS999"), CompletenessLevel::WithCitations)
        .await;
    assert!(result.is_err());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shared_publication_downloads_once_across_datasets() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    // A second dataset whose GEO record cites the same PMID.
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .and(query_param("term", "GSE99999[ACCN]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "esearchresult": {"idlist": ["200099999"]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/esummary.fcgi"))
        .and(query_param("id", "200099999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"200099999": {
                "title": "A second dataset",
                "taxon": "Mus musculus",
                "pubmedids": ["25186741"]
            }}
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let coordinator = coordinator_for(&server, dir.path()).await;

    coordinator
        .enrich_dataset(&DatasetSeed::bare("GSE52564"), CompletenessLevel::WithPdfs)
        .await
        .unwrap();

    let downloads_after_first = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/oa/paper.pdf")
        .count();

    coordinator
        .enrich_dataset(&DatasetSeed::bare("GSE99999"), CompletenessLevel::WithPdfs)
        .await
        .unwrap();

    let downloads_after_second = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/oa/paper.pdf")
        .count();
    assert_eq!(
        downloads_after_first, downloads_after_second,
        "a publication shared across datasets downloads exactly once"
    );

    // Both datasets hold their own link rows to the same publication.
    let first = coordinator
        .registry()
        .get_complete("GSE52564")
        .await
        .unwrap()
        .unwrap();
    let second = coordinator
        .registry()
        .get_complete("GSE99999")
        .await
        .unwrap()
        .unwrap();
    assert!(
        first
            .publications
            .iter()
            .any(|p| p.publication.pub_key == "pmid-25186741")
    );
    assert!(
        second
            .publications
            .iter()
            .any(|p| p.publication.pub_key == "pmid-25186741")
    );
}
