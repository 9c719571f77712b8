//! URL classification for candidate ranking.
//!
//! Classification is pure: given a URL string it assigns a [`UrlType`] and a
//! priority boost without any network traffic, so the ranking in the URL
//! collection stage is deterministic and testable.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// What kind of resource a candidate URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlType {
    /// Fetching the URL yields PDF bytes directly.
    DirectPdf,
    /// An HTML page carrying the full text inline.
    HtmlFulltext,
    /// A publisher landing page that may link to the PDF.
    LandingPage,
    /// A DOI resolver hop (`doi.org` and friends).
    DoiResolver,
    /// Nothing recognized; tried late.
    Unknown,
}

impl UrlType {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectPdf => "direct_pdf",
            Self::HtmlFulltext => "html_fulltext",
            Self::LandingPage => "landing_page",
            Self::DoiResolver => "doi_resolver",
            Self::Unknown => "unknown",
        }
    }

    /// Priority adjustment applied to the source's base priority.
    ///
    /// Lower priority is tried first, so direct PDFs get a negative boost
    /// and resolver hops are pushed back.
    #[must_use]
    pub fn priority_boost(self) -> i32 {
        match self {
            Self::DirectPdf => -2,
            Self::HtmlFulltext | Self::LandingPage => 0,
            Self::Unknown => 1,
            Self::DoiResolver => 3,
        }
    }
}

impl std::str::FromStr for UrlType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_pdf" => Ok(Self::DirectPdf),
            "html_fulltext" => Ok(Self::HtmlFulltext),
            "landing_page" => Ok(Self::LandingPage),
            "doi_resolver" => Ok(Self::DoiResolver),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("invalid url type: {s}")),
        }
    }
}

static DIRECT_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?ix)
        (?: \.pdf (?: \? [^\#]* )? $ )           # path ends in .pdf
        | (?: arxiv\.org/pdf/ )                  # arXiv pdf endpoint
        | (?: /pmc/articles/PMC\d+/pdf )         # PMC pdf path (legacy host)
        | (?: pmc\.ncbi\.nlm\.nih\.gov/articles/PMC\d+/pdf )  # PMC pdf path (modern host)
        | (?: biorxiv\.org/content/ .+ \.full\.pdf )
        | (?: \? pdf=render )                    # render-as-pdf endpoints
        ",
    )
});

static DOI_RESOLVER_HOSTS: &[&str] = &["doi.org", "dx.doi.org", "linkinghub.elsevier.com"];

static HTML_FULLTEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?ix)
        (?: ncbi\.nlm\.nih\.gov/pmc/articles/PMC\d+/?$ )
        | (?: pmc\.ncbi\.nlm\.nih\.gov/articles/PMC\d+/?$ )
        | (?: europepmc\.org/article/ )
        ",
    )
});

static LANDING_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?ix)
        (?: nature\.com/articles/ )
        | (?: sciencedirect\.com/science/article/ )
        | (?: link\.springer\.com/(?:article|chapter)/ )
        | (?: onlinelibrary\.wiley\.com/doi/ )
        | (?: academic\.oup\.com/ )
        ",
    )
});

/// Hosts that serve PubMed Central content.
///
/// Both the legacy and modern hosts must stay in this set: cached PMC URLs
/// are stripped on read when PMC blocks programmatic access, and a stale
/// host list would let blocked URLs through.
static PMC_HOSTS: &[&str] = &["pmc.ncbi.nlm.nih.gov", "ncbi.nlm.nih.gov"];

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static classifier pattern must compile")
}

/// Classifies a URL into a [`UrlType`].
///
/// Deterministic and dependent only on the URL string. Pattern precedence:
/// direct PDF, DOI resolver, HTML full text, known landing pages, unknown.
#[must_use]
pub fn classify(url: &str) -> UrlType {
    if DIRECT_PDF_RE.is_match(url) {
        return UrlType::DirectPdf;
    }

    if let Ok(parsed) = Url::parse(url)
        && let Some(host) = parsed.host_str()
    {
        let host = host.trim_start_matches("www.");
        if DOI_RESOLVER_HOSTS.contains(&host) {
            return UrlType::DoiResolver;
        }
    }

    if HTML_FULLTEXT_RE.is_match(url) {
        return UrlType::HtmlFulltext;
    }

    if LANDING_PAGE_RE.is_match(url) {
        return UrlType::LandingPage;
    }

    UrlType::Unknown
}

/// Returns true when the URL is served from a PubMed Central host.
#[must_use]
pub fn is_pmc_host(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.trim_start_matches("www.");

    // The bare ncbi.nlm.nih.gov host only counts when the path is under /pmc/.
    if host == "ncbi.nlm.nih.gov" {
        return parsed.path().starts_with("/pmc/");
    }
    PMC_HOSTS.contains(&host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_direct_pdf_patterns() {
        for url in [
            "https://www.biorxiv.org/content/10.1101/2024.01.01.573887v1.full.pdf",
            "https://arxiv.org/pdf/2301.00001",
            "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1087880/pdf/",
            "https://example.com/files/paper.pdf",
            "https://example.com/files/paper.pdf?download=1",
            "https://journals.example.org/article/view?pdf=render",
        ] {
            assert_eq!(classify(url), UrlType::DirectPdf, "url: {url}");
        }
    }

    #[test]
    fn test_classify_doi_resolver_hosts() {
        for url in [
            "https://doi.org/10.1186/1742-4690-2-20",
            "https://dx.doi.org/10.1126/science.1258096",
            "https://linkinghub.elsevier.com/retrieve/pii/S0092867414000000",
        ] {
            assert_eq!(classify(url), UrlType::DoiResolver, "url: {url}");
        }
    }

    #[test]
    fn test_classify_html_fulltext_patterns() {
        for url in [
            "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1087880/",
            "https://pmc.ncbi.nlm.nih.gov/articles/PMC1087880/",
            "https://europepmc.org/article/MED/15780141",
        ] {
            assert_eq!(classify(url), UrlType::HtmlFulltext, "url: {url}");
        }
    }

    #[test]
    fn test_classify_unknown_default() {
        assert_eq!(classify("https://hal.science/hal-012345"), UrlType::Unknown);
        assert_eq!(classify("not a url"), UrlType::Unknown);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let url = "https://doi.org/10.1/x";
        assert_eq!(classify(url), classify(url));
    }

    #[test]
    fn test_priority_boost_values() {
        assert_eq!(UrlType::DirectPdf.priority_boost(), -2);
        assert_eq!(UrlType::HtmlFulltext.priority_boost(), 0);
        assert_eq!(UrlType::LandingPage.priority_boost(), 0);
        assert_eq!(UrlType::Unknown.priority_boost(), 1);
        assert_eq!(UrlType::DoiResolver.priority_boost(), 3);
    }

    #[test]
    fn test_is_pmc_host_modern_and_legacy() {
        assert!(is_pmc_host(
            "https://pmc.ncbi.nlm.nih.gov/articles/PMC1087880/"
        ));
        assert!(is_pmc_host(
            "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1087880/pdf/"
        ));
        // Non-PMC paths on the NCBI host are not PMC.
        assert!(!is_pmc_host("https://www.ncbi.nlm.nih.gov/gene/672"));
        assert!(!is_pmc_host("https://europepmc.org/article/MED/1"));
        assert!(!is_pmc_host("not a url"));
    }

    #[test]
    fn test_url_type_round_trips_db_string() {
        for ty in [
            UrlType::DirectPdf,
            UrlType::HtmlFulltext,
            UrlType::LandingPage,
            UrlType::DoiResolver,
            UrlType::Unknown,
        ] {
            assert_eq!(ty.as_str().parse::<UrlType>(), Ok(ty));
        }
    }
}
