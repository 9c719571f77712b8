//! Process-wide configuration, captured once at startup.
//!
//! The config is an immutable value passed by reference into every component;
//! there is no global state. Defaults follow the operational values the
//! pipeline was tuned with.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::CompletenessLevel;

/// Default bound on concurrent PDF downloads across all datasets.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 10;

/// Default per-HTTP-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

/// Default budget for a parallel source fan-out (P1/P2).
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 10;

/// Default re-enrichment retry budget per stage.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default re-enrichment backoff ladder, in minutes.
pub const DEFAULT_BACKOFF_MINUTES: [i64; 3] = [5, 30, 120];

/// Immutable pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Root directory for PDFs, parsed content, and the SOFT cache.
    pub storage_root: PathBuf,

    /// Redis connection URL for the hot tier; `None` disables it.
    pub redis_url: Option<String>,

    /// Contact email sent to NCBI E-utilities.
    pub ncbi_contact_email: String,

    /// Contact email required by the Unpaywall API.
    pub unpaywall_email: String,

    /// Optional NCBI API key (raises the E-utilities rate limit).
    pub ncbi_api_key: Option<String>,

    /// Source toggles.
    pub enable_pmc: bool,
    pub enable_unpaywall: bool,
    pub enable_scihub: bool,
    pub enable_institutional: bool,

    /// Institutional proxy prefix applied to DOIs when enabled.
    pub institutional_proxy_prefix: Option<String>,

    /// Global cap on concurrent PDF downloads.
    pub max_concurrent_downloads: usize,

    /// Per-HTTP-request timeout in seconds.
    pub per_request_timeout_s: u64,

    /// P2 source fan-out budget in seconds.
    pub p2_batch_timeout_s: u64,

    /// P1 citation fan-out budget in seconds.
    pub discovery_timeout_s: u64,

    /// Budget for one pipeline stage on one dataset, in seconds.
    pub stage_timeout_s: u64,

    /// Budget for one dataset's full enrichment pass, in seconds.
    pub dataset_timeout_s: u64,

    /// Per-stage retry budget before a job is poisoned.
    pub max_retries: u32,

    /// Backoff ladder between stage retries, in minutes.
    pub backoff_minutes: [i64; 3],

    /// Maximum publications processed per dataset in one enrichment run.
    pub max_papers_per_dataset: usize,

    /// Completeness level targeted when a request does not name one.
    pub desired_completeness_default: CompletenessLevel,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./geolit-data"),
            redis_url: None,
            ncbi_contact_email: "geolit@example.com".to_string(),
            unpaywall_email: "geolit@example.com".to_string(),
            ncbi_api_key: None,
            enable_pmc: true,
            enable_unpaywall: true,
            enable_scihub: false,
            enable_institutional: false,
            institutional_proxy_prefix: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            per_request_timeout_s: DEFAULT_REQUEST_TIMEOUT_SECS,
            p2_batch_timeout_s: DEFAULT_BATCH_TIMEOUT_SECS,
            discovery_timeout_s: DEFAULT_BATCH_TIMEOUT_SECS,
            stage_timeout_s: 300,
            dataset_timeout_s: 1800,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_minutes: DEFAULT_BACKOFF_MINUTES,
            max_papers_per_dataset: 10,
            desired_completeness_default: CompletenessLevel::FullyEnriched,
        }
    }
}

impl EnrichConfig {
    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.per_request_timeout_s)
    }

    /// P2 fan-out budget as a [`Duration`].
    #[must_use]
    pub fn p2_batch_timeout(&self) -> Duration {
        Duration::from_secs(self.p2_batch_timeout_s)
    }

    /// P1 fan-out budget as a [`Duration`].
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_s)
    }

    /// Per-stage budget as a [`Duration`].
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_s)
    }

    /// Per-dataset budget as a [`Duration`].
    #[must_use]
    pub fn dataset_timeout(&self) -> Duration {
        Duration::from_secs(self.dataset_timeout_s)
    }

    /// Backoff delay for a given retry count, saturating at the last rung.
    #[must_use]
    pub fn backoff_for_retry(&self, retry_count: u32) -> chrono::Duration {
        let idx = (retry_count as usize).min(self.backoff_minutes.len() - 1);
        chrono::Duration::minutes(self.backoff_minutes[idx])
    }

    /// Registry database path under the storage root.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.storage_root.join("geo").join("registry.db")
    }
}
