//! The download waterfall (stage P3).
//!
//! Candidates are tried strictly in ranked order; the first validated PDF
//! wins and every attempt is recorded so the caller can persist a complete
//! "tried N sources" history. Waterfalls are serial by construction; a
//! global semaphore bounds how many publications download concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::classify::{self, UrlType};
use crate::fulltext::PmcBlocklist;
use crate::logfmt::{self, Status};
use crate::source::UrlCandidate;
use crate::util::sha256_hex;

use super::client::{FetchedPdf, PdfFetcher};
use super::error::DownloadError;
use super::landing::extract_pdf_url;

/// Terminal status of one waterfall attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Skipped,
    Paywalled,
}

impl AttemptStatus {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Paywalled => "paywalled",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "paywalled" => Ok(Self::Paywalled),
            _ => Err(format!("invalid attempt status: {s}")),
        }
    }
}

/// One recorded waterfall attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub url: String,
    pub source: String,
    pub status: AttemptStatus,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Outcome of a full waterfall run for one publication.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub sha256: Option<String>,
    pub file_size: Option<u64>,
    /// Source of the winning candidate.
    pub source: Option<String>,
    /// Every attempt, in execution order.
    pub attempts: Vec<AttemptRecord>,
}

impl DownloadResult {
    fn failed(attempts: Vec<AttemptRecord>) -> Self {
        Self {
            success: false,
            file_path: None,
            sha256: None,
            file_size: None,
            source: None,
            attempts,
        }
    }
}

/// The P3 manager.
pub struct DownloadManager {
    fetcher: PdfFetcher,
    semaphore: Arc<Semaphore>,
    pmc_blocklist: Arc<PmcBlocklist>,
    institutional_enabled: bool,
}

impl DownloadManager {
    /// Creates a manager with the given download bound.
    #[must_use]
    pub fn new(
        fetcher: PdfFetcher,
        semaphore: Arc<Semaphore>,
        pmc_blocklist: Arc<PmcBlocklist>,
        institutional_enabled: bool,
    ) -> Self {
        Self {
            fetcher,
            semaphore,
            pmc_blocklist,
            institutional_enabled,
        }
    }

    /// The shared semaphore, for callers coordinating multiple datasets.
    #[must_use]
    pub fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore)
    }

    /// Runs the waterfall for one publication.
    ///
    /// Writes the first validated PDF to `dest` and stops. Candidates are
    /// tried in the order given; auth-gated candidates are skipped unless
    /// institutional mode is on.
    #[instrument(skip(self, candidates), fields(dest = %dest.display(), candidates = candidates.len()))]
    pub async fn download(&self, candidates: &[UrlCandidate], dest: &Path) -> DownloadResult {
        let Ok(_permit) = self.semaphore.acquire().await else {
            // Semaphore closure only happens at shutdown.
            return DownloadResult::failed(Vec::new());
        };

        let mut attempts = Vec::new();

        for candidate in candidates {
            if candidate.requires_auth && !self.institutional_enabled {
                attempts.push(AttemptRecord {
                    url: candidate.url.clone(),
                    source: candidate.source.clone(),
                    status: AttemptStatus::Skipped,
                    http_status: None,
                    error: Some("requires institutional access".to_string()),
                    attempted_at: Utc::now(),
                });
                logfmt::log_event(
                    Status::Skip,
                    &candidate.source,
                    "candidate requires auth",
                    &[("url", &candidate.url)],
                );
                continue;
            }

            match self.try_candidate(candidate).await {
                Ok(pdf) => {
                    let sha256 = sha256_hex(&pdf.bytes);
                    let size = pdf.bytes.len() as u64;
                    if let Err(error) = write_pdf(dest, &pdf.bytes).await {
                        warn!(dest = %dest.display(), error = %error, "failed to persist validated PDF");
                        attempts.push(AttemptRecord {
                            url: candidate.url.clone(),
                            source: candidate.source.clone(),
                            status: AttemptStatus::Failed,
                            http_status: None,
                            error: Some(error.to_string()),
                            attempted_at: Utc::now(),
                        });
                        continue;
                    }

                    attempts.push(AttemptRecord {
                        url: candidate.url.clone(),
                        source: candidate.source.clone(),
                        status: AttemptStatus::Success,
                        http_status: Some(200),
                        error: None,
                        attempted_at: Utc::now(),
                    });
                    logfmt::log_event(
                        Status::Ok,
                        &candidate.source,
                        "PDF downloaded",
                        &[("bytes", &size.to_string()), ("sha256", &sha256[..12])],
                    );
                    info!(dest = %dest.display(), size, "waterfall succeeded");

                    return DownloadResult {
                        success: true,
                        file_path: Some(dest.to_path_buf()),
                        sha256: Some(sha256),
                        file_size: Some(size),
                        source: Some(candidate.source.clone()),
                        attempts,
                    };
                }
                Err(error) => {
                    let status = classify_attempt_failure(&error);
                    if error.status() == Some(403) && classify::is_pmc_host(&candidate.url) {
                        self.pmc_blocklist.record_block();
                    }
                    logfmt::log_event(
                        Status::Fail,
                        &candidate.source,
                        "candidate failed",
                        &[("url", &candidate.url), ("reason", &error.to_string())],
                    );
                    attempts.push(AttemptRecord {
                        url: candidate.url.clone(),
                        source: candidate.source.clone(),
                        status,
                        http_status: error.status(),
                        error: Some(error.to_string()),
                        attempted_at: Utc::now(),
                    });
                }
            }
        }

        logfmt::log_event(
            Status::Fail,
            "download",
            "waterfall exhausted",
            &[("attempts", &attempts.len().to_string())],
        );
        DownloadResult::failed(attempts)
    }

    /// Attempts one candidate, retrying once on a transient failure.
    async fn try_candidate(&self, candidate: &UrlCandidate) -> Result<FetchedPdf, DownloadError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match self.fetch_by_type(candidate).await {
                Ok(pdf) => return Ok(pdf),
                Err(error) => error,
            };

            if attempt == 1 && error.is_transient() {
                let jitter_ms = rand::thread_rng().gen_range(1000..=2000);
                debug!(url = %candidate.url, jitter_ms, "retrying transient download failure");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                continue;
            }
            return Err(error);
        }
    }

    /// Dispatches on the candidate's classified type.
    async fn fetch_by_type(&self, candidate: &UrlCandidate) -> Result<FetchedPdf, DownloadError> {
        match candidate.url_type {
            UrlType::DirectPdf => match self.fetcher.fetch_pdf(&candidate.url).await {
                Ok(pdf) => Ok(pdf),
                // An HTML body behind a direct-pdf URL usually means an
                // interstitial page; demote to landing extraction.
                Err(DownloadError::Validation { .. }) => {
                    self.fetch_via_landing(&candidate.url).await
                }
                Err(error) => Err(error),
            },
            UrlType::LandingPage | UrlType::HtmlFulltext | UrlType::DoiResolver | UrlType::Unknown => {
                self.fetch_via_landing(&candidate.url).await
            }
        }
    }

    /// Fetches a page, extracts its PDF link, and fetches that.
    ///
    /// DOI-resolver hops land here too: redirects are followed by the
    /// fetcher and extraction runs against the final URL.
    async fn fetch_via_landing(&self, url: &str) -> Result<FetchedPdf, DownloadError> {
        let page = self.fetcher.fetch_html(url).await?;
        let pdf_url = extract_pdf_url(&page.body, &page.final_url)
            .ok_or_else(|| DownloadError::NoPdfLink { url: url.to_string() })?;
        debug!(landing = url, pdf_url, "landing page yielded PDF link");
        self.fetcher.fetch_pdf(&pdf_url).await
    }
}

/// Maps a candidate failure onto its attempt status.
fn classify_attempt_failure(error: &DownloadError) -> AttemptStatus {
    if error.is_access_denied() {
        AttemptStatus::Paywalled
    } else {
        AttemptStatus::Failed
    }
}

/// Writes PDF bytes to `dest`, creating parent directories.
async fn write_pdf(dest: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;
    file.flush().await.map_err(|e| DownloadError::io(dest, e))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_status_round_trip() {
        for status in [
            AttemptStatus::Success,
            AttemptStatus::Failed,
            AttemptStatus::Skipped,
            AttemptStatus::Paywalled,
        ] {
            assert_eq!(status.as_str().parse::<AttemptStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_classify_attempt_failure() {
        assert_eq!(
            classify_attempt_failure(&DownloadError::http_status("u", 403, None)),
            AttemptStatus::Paywalled
        );
        assert_eq!(
            classify_attempt_failure(&DownloadError::http_status("u", 404, None)),
            AttemptStatus::Failed
        );
        assert_eq!(
            classify_attempt_failure(&DownloadError::timeout("u")),
            AttemptStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_write_pdf_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("GSE1/original/pmid-1.pdf");
        write_pdf(&dest, b"%PDF-1.7 test").await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"%PDF-1.7 test");
    }
}
