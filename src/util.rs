//! Small shared helpers consumed by the source clients, the download
//! waterfall, and the parser: PDF validation, content hashing, and URL
//! normalization.

use sha2::{Digest, Sha256};
use url::Url;

/// Magic bytes every valid PDF starts with.
pub const PDF_MAGIC: &[u8; 5] = b"%PDF-";

/// Minimum plausible PDF size in bytes (1 KB).
pub const MIN_PDF_BYTES: u64 = 1024;

/// Maximum accepted PDF size in bytes (50 MB).
pub const MAX_PDF_BYTES: u64 = 50 * 1024 * 1024;

/// Returns true when `bytes` begins with the `%PDF-` magic.
#[must_use]
pub fn pdf_magic_check(bytes: &[u8]) -> bool {
    bytes.len() >= PDF_MAGIC.len() && &bytes[..PDF_MAGIC.len()] == PDF_MAGIC
}

/// Returns true when `len` falls inside the accepted PDF size window.
#[must_use]
pub fn pdf_size_check(len: u64) -> bool {
    (MIN_PDF_BYTES..=MAX_PDF_BYTES).contains(&len)
}

/// Hex-encoded SHA-256 of arbitrary bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Hash of a title normalized to lowercase alphanumerics.
///
/// Used as the last dedup key when a publication carries neither PMID nor
/// DOI, so a preprint and its published version collapse on shared titles.
#[must_use]
pub fn normalized_title_hash(title: &str) -> String {
    let normalized: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    sha256_hex(normalized.as_bytes())
}

/// Tracking query parameters stripped during URL normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
];

/// Normalizes a candidate URL: lowercases scheme and host, drops tracking
/// query parameters, and strips any fragment.
///
/// Returns the input unchanged when it does not parse as a URL; candidate
/// filtering happens downstream, not here.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    url.to_string()
}

/// Compares two hosts, tolerating a `www.` prefix on either side.
#[must_use]
pub fn hosts_match(left: &str, right: &str) -> bool {
    let strip = |h: &str| h.trim_start_matches("www.").to_ascii_lowercase();
    strip(left) == strip(right)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        // Writing to a String cannot fail.
        let _ = write!(out, "{b:02x}");
    }
    out
}
