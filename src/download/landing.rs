//! Landing-page PDF link extraction.
//!
//! Publisher landing pages advertise their PDF through a handful of stable
//! conventions; extraction is regex-based and ordered by reliability:
//! `citation_pdf_url` meta tags first, then `<link rel="alternate">`
//! entries, then any anchor whose href looks like a PDF.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static CITATION_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?is)<meta[^>]+name\s*=\s*["']citation_pdf_url["'][^>]+content\s*=\s*["']([^"']+)["']"#,
    )
});

static CITATION_PDF_REVERSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?is)<meta[^>]+content\s*=\s*["']([^"']+)["'][^>]+name\s*=\s*["']citation_pdf_url["']"#,
    )
});

static LINK_ALTERNATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?is)<link[^>]+rel\s*=\s*["']alternate["'][^>]+type\s*=\s*["']application/pdf["'][^>]+href\s*=\s*["']([^"']+)["']"#,
    )
});

static PDF_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)href\s*=\s*["']([^"']*(?:/pdf/[^"']*|\.pdf(?:\?[^"']*)?))["']"#)
});

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static landing-page pattern must compile")
}

/// Extracts the most credible PDF URL from a landing page.
///
/// Relative links resolve against `page_url`. Returns `None` when no
/// convention matches.
#[must_use]
pub fn extract_pdf_url(html: &str, page_url: &str) -> Option<String> {
    let raw = CITATION_PDF_RE
        .captures(html)
        .or_else(|| CITATION_PDF_REVERSED_RE.captures(html))
        .or_else(|| LINK_ALTERNATE_RE.captures(html))
        .or_else(|| PDF_ANCHOR_RE.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())?;

    absolutize(&raw, page_url)
}

/// Resolves a possibly relative link against the page URL.
fn absolutize(link: &str, page_url: &str) -> Option<String> {
    if link.starts_with("http://") || link.starts_with("https://") {
        return Some(link.to_string());
    }
    let base = Url::parse(page_url).ok()?;
    base.join(link).ok().map(|u| u.to_string())
}
