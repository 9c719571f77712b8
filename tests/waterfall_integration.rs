//! Integration tests for the download waterfall (P3).

use std::sync::Arc;
use std::time::Duration;

use geolit_core::classify::UrlType;
use geolit_core::download::{AttemptStatus, DownloadManager, PdfFetcher};
use geolit_core::fulltext::PmcBlocklist;
use geolit_core::source::UrlCandidate;
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pdf_body() -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(4096, b'x');
    body
}

fn manager(blocklist: Arc<PmcBlocklist>, institutional: bool) -> DownloadManager {
    DownloadManager::new(
        PdfFetcher::new("geolit-test/0.1", Duration::from_secs(5)),
        Arc::new(Semaphore::new(10)),
        blocklist,
        institutional,
    )
}

fn candidate(url: String, source: &str, url_type: UrlType, priority: i32) -> UrlCandidate {
    UrlCandidate::new(url, source, url_type, priority)
}

#[tokio::test]
async fn test_waterfall_stops_at_first_validated_pdf() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/first.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/second.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .expect(1)
        .mount(&server)
        .await;
    // The third candidate must never be touched.
    Mock::given(method("GET"))
        .and(path("/third.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .expect(0)
        .mount(&server)
        .await;

    let candidates = vec![
        candidate(format!("{}/first.pdf", server.uri()), "pmc", UrlType::DirectPdf, 1),
        candidate(format!("{}/second.pdf", server.uri()), "unpaywall", UrlType::DirectPdf, 2),
        candidate(format!("{}/third.pdf", server.uri()), "core", UrlType::DirectPdf, 3),
    ];

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("paper.pdf");
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&candidates, &dest)
        .await;

    assert!(result.success);
    assert_eq!(result.source.as_deref(), Some("unpaywall"));
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].status, AttemptStatus::Failed);
    assert_eq!(result.attempts[1].status, AttemptStatus::Success);
    assert!(dest.exists());
    assert_eq!(result.file_size, Some(4096));
    assert!(result.sha256.is_some());
}

#[tokio::test]
async fn test_waterfall_attempt_sequence_is_deterministic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let candidates: Vec<UrlCandidate> = (0..4)
        .map(|i| {
            candidate(
                format!("{}/c{i}.pdf", server.uri()),
                "pmc",
                UrlType::DirectPdf,
                i,
            )
        })
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(Arc::new(PmcBlocklist::new()), false);

    // Same candidates, same failures: the attempt sequence is identical
    // across runs regardless of scheduler timing.
    let first = mgr.download(&candidates, &dir.path().join("a.pdf")).await;
    let second = mgr.download(&candidates, &dir.path().join("b.pdf")).await;

    let urls = |result: &geolit_core::download::DownloadResult| {
        result
            .attempts
            .iter()
            .map(|a| a.url.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(urls(&first), urls(&second));
    assert!(!first.success);
    assert_eq!(first.attempts.len(), 4, "every candidate attempted in order");
}

#[tokio::test]
async fn test_waterfall_landing_page_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><head><meta name="citation_pdf_url" content="{}/article.pdf"></head></html>"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .mount(&server)
        .await;

    let candidates = vec![candidate(
        format!("{}/article", server.uri()),
        "crossref",
        UrlType::LandingPage,
        1,
    )];

    let dir = tempfile::tempdir().unwrap();
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&candidates, &dir.path().join("paper.pdf"))
        .await;

    assert!(result.success, "landing page should route to its PDF");
}

#[tokio::test]
async fn test_waterfall_direct_pdf_demotes_to_landing_on_html_body() {
    let server = MockServer::start().await;
    // The "direct" URL actually serves an interstitial page.
    Mock::given(method("GET"))
        .and(path("/fake.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><a href="{}/real.pdf">download</a></html>"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/real.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .mount(&server)
        .await;

    let candidates = vec![candidate(
        format!("{}/fake.pdf", server.uri()),
        "crossref",
        UrlType::DirectPdf,
        1,
    )];

    let dir = tempfile::tempdir().unwrap();
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&candidates, &dir.path().join("paper.pdf"))
        .await;

    assert!(result.success);
}

#[tokio::test]
async fn test_waterfall_skips_auth_candidates_without_institutional_mode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
        .expect(0)
        .mount(&server)
        .await;

    let mut gated = candidate(
        format!("{}/proxied.pdf", server.uri()),
        "institutional",
        UrlType::DirectPdf,
        1,
    );
    gated.requires_auth = true;

    let dir = tempfile::tempdir().unwrap();
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&[gated], &dir.path().join("paper.pdf"))
        .await;

    assert!(!result.success);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].status, AttemptStatus::Skipped);
}

#[tokio::test]
async fn test_waterfall_exhaustion_reports_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paywalled.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let candidates = vec![
        candidate(format!("{}/paywalled.pdf", server.uri()), "crossref", UrlType::DirectPdf, 1),
        candidate(format!("{}/missing.pdf", server.uri()), "core", UrlType::DirectPdf, 2),
    ];

    let dir = tempfile::tempdir().unwrap();
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&candidates, &dir.path().join("paper.pdf"))
        .await;

    assert!(!result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].status, AttemptStatus::Paywalled);
    assert_eq!(result.attempts[0].http_status, Some(403));
    assert_eq!(result.attempts[1].status, AttemptStatus::Failed);
    assert_eq!(result.attempts[1].http_status, Some(404));
}

#[tokio::test]
async fn test_waterfall_rejects_invalid_pdf_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain text, no pdf magic"))
        .mount(&server)
        .await;

    let candidates = vec![candidate(
        format!("{}/bad.pdf", server.uri()),
        "core",
        UrlType::DirectPdf,
        1,
    )];

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("paper.pdf");
    let result = manager(Arc::new(PmcBlocklist::new()), false)
        .download(&candidates, &dest)
        .await;

    assert!(!result.success);
    assert!(!dest.exists(), "nothing invalid is ever persisted");
}
