//! HTTP client for fetching candidate URLs.
//!
//! Streams PDF bodies with a hard size cap, validates magic bytes, and
//! falls back to a browser user-agent exactly once when a host 403s the
//! tool's default identity.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use tracing::{debug, instrument, warn};

use crate::util::{MAX_PDF_BYTES, MIN_PDF_BYTES, pdf_magic_check};

use super::error::DownloadError;

/// Browser User-Agent used as fallback when servers return 403.
///
/// The client sends a default User-Agent identifying the tool on the first
/// attempt. If the server responds with 403 (e.g. bot-detection), the fetch
/// retries once with this browser-like User-Agent before giving up.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Redirect bound for candidate fetches (DOI hops included).
const MAX_REDIRECTS: usize = 5;

/// Cap on landing-page HTML bodies (2 MB).
const MAX_HTML_BYTES: u64 = 2 * 1024 * 1024;

/// A fetched and validated PDF body.
#[derive(Debug, Clone)]
pub struct FetchedPdf {
    /// The complete PDF bytes.
    pub bytes: Vec<u8>,
    /// Response Content-Type, when the server sent one.
    pub content_type: Option<String>,
    /// Final URL after redirects.
    pub final_url: String,
}

/// A fetched landing page.
#[derive(Debug, Clone)]
pub struct FetchedHtml {
    /// The page body.
    pub body: String,
    /// Final URL after redirects; relative PDF links resolve against this.
    pub final_url: String,
}

/// HTTP client for candidate fetches.
///
/// Created once per download manager and reused so connections pool.
#[derive(Debug, Clone)]
pub struct PdfFetcher {
    client: Client,
    user_agent: String,
}

impl PdfFetcher {
    /// Creates a fetcher with the given identity and per-request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        let user_agent = user_agent.into();
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .cookie_store(true)
            .gzip(true)
            .build()
            .expect("failed to build download HTTP client with static configuration");
        Self { client, user_agent }
    }

    /// Fetches a candidate URL expecting PDF bytes.
    ///
    /// Streams the body up to the 50 MB cap, then validates the `%PDF-`
    /// magic and the size window. A 403 triggers one browser-UA retry.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network failure, bad status, or failed
    /// validation. An HTML body surfaces as a `Validation` error carrying
    /// the content type so the waterfall can demote to landing-page
    /// extraction.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_pdf(&self, url: &str) -> Result<FetchedPdf, DownloadError> {
        let response = match self.get(url, None).await {
            Ok(response) => response,
            Err(error) if error.status() == Some(403) => {
                debug!(url, "403 with default identity; retrying with browser user-agent");
                self.get(url, Some(BROWSER_USER_AGENT)).await?
            }
            Err(error) => return Err(error),
        };

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        if let Some(length) = response.content_length()
            && length > MAX_PDF_BYTES
        {
            return Err(DownloadError::validation(
                url,
                format!("declared size {length} exceeds {MAX_PDF_BYTES} byte cap"),
            ));
        }

        let bytes = self.read_capped(url, response, MAX_PDF_BYTES).await?;

        if !pdf_magic_check(&bytes) {
            let kind = content_type.as_deref().unwrap_or("unknown");
            return Err(DownloadError::validation(
                url,
                format!("body is not a PDF (content-type {kind})"),
            ));
        }
        if (bytes.len() as u64) < MIN_PDF_BYTES {
            return Err(DownloadError::validation(
                url,
                format!("body too small ({} bytes)", bytes.len()),
            ));
        }

        Ok(FetchedPdf {
            bytes,
            content_type,
            final_url,
        })
    }

    /// Fetches a landing page as HTML.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on network failure or bad status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_html(&self, url: &str) -> Result<FetchedHtml, DownloadError> {
        let response = match self.get(url, None).await {
            Ok(response) => response,
            Err(error) if error.status() == Some(403) => {
                self.get(url, Some(BROWSER_USER_AGENT)).await?
            }
            Err(error) => return Err(error),
        };

        let final_url = response.url().to_string();
        let bytes = self.read_capped(url, response, MAX_HTML_BYTES).await?;
        Ok(FetchedHtml {
            body: String::from_utf8_lossy(&bytes).into_owned(),
            final_url,
        })
    }

    async fn get(&self, url: &str, user_agent: Option<&str>) -> Result<Response, DownloadError> {
        if reqwest::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let mut request = self.client.get(url);
        if let Some(ua) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            return Err(DownloadError::http_status(url, status.as_u16(), retry_after));
        }

        Ok(response)
    }

    /// Streams a response body into memory, failing past `cap` bytes.
    async fn read_capped(
        &self,
        url: &str,
        response: Response,
        cap: u64,
    ) -> Result<Vec<u8>, DownloadError> {
        let mut bytes: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e)
                }
            })?;
            if (bytes.len() + chunk.len()) as u64 > cap {
                warn!(url, cap, "body exceeded size cap mid-stream");
                return Err(DownloadError::validation(
                    url,
                    format!("body exceeded {cap} byte cap"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }

    /// The default identity this fetcher sends.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
