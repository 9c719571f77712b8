//! Publication quality validation.
//!
//! Each discovered publication is scored on four factors (abstract length,
//! citation count, journal reputation, recency) and assigned a discrete
//! band. Filtering policy belongs to the caller; the default surface is
//! every non-rejected publication.

use serde::{Deserialize, Serialize};

use crate::source::CitationRecord;

/// Discrete quality band, ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Rejected,
}

impl QualityBand {
    /// Database string representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Acceptable => "acceptable",
            Self::Poor => "poor",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for QualityBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "excellent" => Ok(Self::Excellent),
            "good" => Ok(Self::Good),
            "acceptable" => Ok(Self::Acceptable),
            "poor" => Ok(Self::Poor),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("invalid quality band: {s}")),
        }
    }
}

/// Score plus band for one publication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: f64,
    pub band: QualityBand,
}

/// Journals treated as high-reputation for the scoring factor.
///
/// Deliberately small; an unknown journal is neutral, not penalized.
const REPUTABLE_JOURNALS: &[&str] = &[
    "nature",
    "science",
    "cell",
    "the journal of neuroscience",
    "nature neuroscience",
    "nature methods",
    "nature genetics",
    "nucleic acids research",
    "genome biology",
    "genome research",
    "plos biology",
    "elife",
    "pnas",
    "proceedings of the national academy of sciences",
];

/// Scores a publication on the four-factor rubric.
#[must_use]
pub fn assess(record: &CitationRecord, current_year: i32) -> QualityAssessment {
    // Abstract length: full credit at 500 chars.
    let abstract_len = record.abstract_text.as_deref().map_or(0, str::len);
    let abstract_factor = (abstract_len as f64 / 500.0).min(1.0);

    // Citation count: log-ish credit, full at 100.
    let citations = record.citation_count.unwrap_or(0).max(0) as f64;
    let citation_factor = (citations / 100.0).min(1.0);

    // Journal reputation: known journals get full credit, everything else
    // a neutral half.
    let journal_factor = record.journal.as_deref().map_or(0.5, |journal| {
        let normalized = journal.trim().to_ascii_lowercase();
        if REPUTABLE_JOURNALS.contains(&normalized.as_str()) {
            1.0
        } else {
            0.5
        }
    });

    // Recency: full credit within 5 years, fading to zero at 25.
    let recency_factor = record.year.map_or(0.5, |year| {
        let age = (current_year - year).max(0) as f64;
        if age <= 5.0 {
            1.0
        } else {
            (1.0 - (age - 5.0) / 20.0).max(0.0)
        }
    });

    let score = 0.3 * abstract_factor
        + 0.3 * citation_factor
        + 0.2 * journal_factor
        + 0.2 * recency_factor;

    let band = if record.title.trim().is_empty() {
        QualityBand::Rejected
    } else if score >= 0.8 {
        QualityBand::Excellent
    } else if score >= 0.6 {
        QualityBand::Good
    } else if score >= 0.35 {
        QualityBand::Acceptable
    } else if score >= 0.15 {
        QualityBand::Poor
    } else {
        QualityBand::Rejected
    };

    QualityAssessment { score, band }
}
