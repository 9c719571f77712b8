//! Identifier parsing and validation for GEO accessions and publication ids.
//!
//! Accepted shapes:
//! - GEO accession: `GSE<digits>`
//! - PMID: digits
//! - PMCID: `PMC<digits>`
//! - DOI: `10.<registrant>/<suffix>`
//! - arXiv id: `YYMM.NNNNN` with an optional version suffix
//!
//! A publication may carry any subset of the four external ids; at least one
//! must be present. [`pub_key`] picks the stable filesystem/registry key in
//! fixed precedence.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static GEO_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^GSE\d+$"));
static PMID_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^\d+$"));
static PMCID_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^PMC\d+$"));
static DOI_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^10\.\d+/.+$"));
static ARXIV_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^\d{4}\.\d{4,5}(v\d+)?$"));

/// Compiles a static pattern, panicking only on programmer error.
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static identifier pattern must compile")
}

/// Errors from identifier validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentError {
    /// The string is not a valid GEO series accession.
    #[error("invalid GEO accession: {0}")]
    InvalidGeoAccession(String),

    /// A publication was constructed with no external identifier at all.
    #[error("publication has no identifier (pmid/doi/pmcid/arxiv all absent)")]
    NoIdentifier,
}

/// A validated GEO series accession (`GSE<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeoAccession(String);

impl GeoAccession {
    /// Validates and wraps a GEO accession.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::InvalidGeoAccession`] when the input does not
    /// match `GSE<digits>`.
    pub fn parse(raw: &str) -> Result<Self, IdentError> {
        let trimmed = raw.trim();
        if GEO_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(IdentError::InvalidGeoAccession(raw.to_string()))
        }
    }

    /// Returns the accession string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GeoAccession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The optional external identifiers of one publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubIds {
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
}

impl PubIds {
    /// Builds an id set from raw strings, keeping only values that validate.
    #[must_use]
    pub fn sanitized(
        pmid: Option<&str>,
        pmcid: Option<&str>,
        doi: Option<&str>,
        arxiv_id: Option<&str>,
    ) -> Self {
        Self {
            pmid: pmid.map(str::trim).filter(|v| is_pmid(v)).map(String::from),
            pmcid: pmcid
                .map(str::trim)
                .filter(|v| is_pmcid(v))
                .map(String::from),
            doi: doi.map(str::trim).filter(|v| is_doi(v)).map(String::from),
            arxiv_id: arxiv_id
                .map(str::trim)
                .filter(|v| is_arxiv_id(v))
                .map(String::from),
        }
    }

    /// True when no identifier is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pmid.is_none() && self.pmcid.is_none() && self.doi.is_none() && self.arxiv_id.is_none()
    }

    /// Returns the stable registry/file key for this id set.
    ///
    /// Precedence: pmid, doi (slashes mapped to `_` for path safety), pmcid,
    /// arXiv id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::NoIdentifier`] when every id is absent.
    pub fn pub_key(&self) -> Result<String, IdentError> {
        if let Some(pmid) = &self.pmid {
            return Ok(format!("pmid-{pmid}"));
        }
        if let Some(doi) = &self.doi {
            return Ok(format!("doi-{}", doi.replace('/', "_")));
        }
        if let Some(pmcid) = &self.pmcid {
            return Ok(format!("pmcid-{pmcid}"));
        }
        if let Some(arxiv) = &self.arxiv_id {
            return Ok(format!("arxiv-{arxiv}"));
        }
        Err(IdentError::NoIdentifier)
    }

    /// Merges identifiers from `other`, never overwriting ones already set.
    ///
    /// Identifier sets are monotonic: ids may be added, never changed.
    pub fn absorb(&mut self, other: &Self) {
        if self.pmid.is_none() {
            self.pmid.clone_from(&other.pmid);
        }
        if self.pmcid.is_none() {
            self.pmcid.clone_from(&other.pmcid);
        }
        if self.doi.is_none() {
            self.doi.clone_from(&other.doi);
        }
        if self.arxiv_id.is_none() {
            self.arxiv_id.clone_from(&other.arxiv_id);
        }
    }
}

/// True for a bare PMID (`digits`).
#[must_use]
pub fn is_pmid(s: &str) -> bool {
    PMID_RE.is_match(s)
}

/// True for a PMCID (`PMC<digits>`).
#[must_use]
pub fn is_pmcid(s: &str) -> bool {
    PMCID_RE.is_match(s)
}

/// True for a DOI (`10.<registrant>/<suffix>`).
#[must_use]
pub fn is_doi(s: &str) -> bool {
    DOI_RE.is_match(s)
}

/// True for a modern arXiv id (`YYMM.NNNNN[vN]`).
#[must_use]
pub fn is_arxiv_id(s: &str) -> bool {
    ARXIV_RE.is_match(s)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_accession_valid() {
        let acc = GeoAccession::parse("GSE52564").unwrap();
        assert_eq!(acc.as_str(), "GSE52564");
        assert_eq!(acc.to_string(), "GSE52564");
    }

    #[test]
    fn test_geo_accession_trims_whitespace() {
        assert_eq!(GeoAccession::parse(" GSE1 ").unwrap().as_str(), "GSE1");
    }

    #[test]
    fn test_geo_accession_invalid() {
        for bad in ["GSE", "GDS52564", "gse52564", "52564", "GSE52564x"] {
            assert!(GeoAccession::parse(bad).is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn test_identifier_patterns() {
        assert!(is_pmid("25186741"));
        assert!(!is_pmid("PMC123"));
        assert!(is_pmcid("PMC1087880"));
        assert!(!is_pmcid("1087880"));
        assert!(is_doi("10.1186/1742-4690-2-20"));
        assert!(!is_doi("doi:10.1186/x"));
        assert!(is_arxiv_id("2301.00001"));
        assert!(is_arxiv_id("2301.00001v2"));
        assert!(!is_arxiv_id("quant-ph/0001001"));
    }

    #[test]
    fn test_pub_key_precedence() {
        let ids = PubIds::sanitized(
            Some("25186741"),
            Some("PMC1087880"),
            Some("10.1186/1742-4690-2-20"),
            None,
        );
        assert_eq!(ids.pub_key().unwrap(), "pmid-25186741");

        let ids = PubIds::sanitized(None, Some("PMC1087880"), Some("10.1186/1742-4690-2-20"), None);
        assert_eq!(ids.pub_key().unwrap(), "doi-10.1186_1742-4690-2-20");

        let ids = PubIds::sanitized(None, Some("PMC1087880"), None, None);
        assert_eq!(ids.pub_key().unwrap(), "pmcid-PMC1087880");

        let ids = PubIds::sanitized(None, None, None, Some("2301.00001"));
        assert_eq!(ids.pub_key().unwrap(), "arxiv-2301.00001");
    }

    #[test]
    fn test_pub_key_requires_an_identifier() {
        assert_eq!(PubIds::default().pub_key(), Err(IdentError::NoIdentifier));
    }

    #[test]
    fn test_sanitized_drops_malformed_ids() {
        let ids = PubIds::sanitized(Some("not-a-pmid"), None, Some("10.1/x"), None);
        assert!(ids.pmid.is_none());
        assert_eq!(ids.doi.as_deref(), Some("10.1/x"));
    }

    #[test]
    fn test_absorb_is_monotonic() {
        let mut ids = PubIds::sanitized(Some("123"), None, None, None);
        let other = PubIds::sanitized(Some("999"), None, Some("10.1/abc"), None);
        ids.absorb(&other);
        assert_eq!(ids.pmid.as_deref(), Some("123"), "existing id never changes");
        assert_eq!(ids.doi.as_deref(), Some("10.1/abc"), "missing id is added");
    }
}
