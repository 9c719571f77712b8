//! Error types for the PDF acquisition stage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching and validating one candidate URL.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The body failed PDF validation (magic bytes or size window).
    #[error("PDF validation failed for {url}: {reason}")]
    Validation {
        /// The URL whose body failed validation.
        url: String,
        /// What check failed.
        reason: String,
    },

    /// A landing page yielded no PDF link.
    #[error("no PDF link found on landing page {url}")]
    NoPdfLink {
        /// The landing page URL.
        url: String,
    },

    /// File system error persisting the PDF.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a validation error.
    pub fn validation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// The HTTP status carried by this error, when there is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures where a single retry is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// True when the response indicates a paywall or access block.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self.status(), Some(401 | 402 | 403))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.pdf", 404, None);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/file.pdf"));
    }

    #[test]
    fn test_validation_display() {
        let error = DownloadError::validation("https://example.com/f.pdf", "magic bytes");
        assert!(error.to_string().contains("magic bytes"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DownloadError::timeout("u").is_transient());
        assert!(DownloadError::http_status("u", 503, None).is_transient());
        assert!(DownloadError::http_status("u", 429, None).is_transient());
        assert!(!DownloadError::http_status("u", 404, None).is_transient());
        assert!(!DownloadError::validation("u", "x").is_transient());
    }

    #[test]
    fn test_access_denied_classification() {
        assert!(DownloadError::http_status("u", 403, None).is_access_denied());
        assert!(DownloadError::http_status("u", 401, None).is_access_denied());
        assert!(!DownloadError::http_status("u", 404, None).is_access_denied());
        assert!(!DownloadError::timeout("u").is_access_denied());
    }
}
