//! Full-text URL collection (stage P2).
//!
//! Fans out over every enabled URL source in parallel under a global
//! budget, normalizes and classifies the returned candidates, applies the
//! blocked-PMC compensation, and produces one ranked list per publication.
//! Individual source failures never fail the batch; they fold into the
//! per-source status map.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::classify::{self, UrlType};
use crate::logfmt::{self, Status};
use crate::source::{PubRef, SourceError, SourceRegistry, UrlCandidate};
use crate::util::normalize_url;

/// How long a PMC 403 keeps the host marked as blocked.
const PMC_BLOCK_WINDOW: Duration = Duration::from_secs(3600);

/// Outcome of one source's participation in a collection batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum SourceOutcome {
    /// Source returned this many candidates.
    Ok(usize),
    /// Source responded but had nothing for this publication.
    Empty,
    /// Identifier unknown to the source.
    NotFound,
    /// Source refused access.
    Denied(String),
    /// Transient failure after the retry.
    Transient(String),
    /// Source exceeded the batch budget.
    TimedOut,
}

/// Result of collecting URLs for one publication.
#[derive(Debug, Clone)]
pub struct UrlCollection {
    /// False only when zero candidates were produced.
    pub success: bool,
    /// Ranked candidates, best first.
    pub all_urls: Vec<UrlCandidate>,
    /// Per-source diagnostics for the batch.
    pub source_statuses: HashMap<String, SourceOutcome>,
}

/// Shared record of PMC's programmatic-access blocking.
///
/// The download waterfall records a 403 from a PMC host here; the collection
/// stage consults it so a cached PMC URL is never trusted alone.
#[derive(Debug, Default)]
pub struct PmcBlocklist {
    /// Milliseconds since an arbitrary epoch instant; 0 = never blocked.
    blocked_at_ms: AtomicU64,
}

impl PmcBlocklist {
    /// Creates an unblocked tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a PMC block observed just now.
    pub fn record_block(&self) {
        self.blocked_at_ms
            .store(Self::now_ms().max(1), Ordering::SeqCst);
        logfmt::log_event(
            Status::Warn,
            "pmc",
            "programmatic access blocked; PMC candidates distrusted",
            &[],
        );
    }

    /// True while the block window is active.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        let blocked_at = self.blocked_at_ms.load(Ordering::SeqCst);
        if blocked_at == 0 {
            return false;
        }
        Self::now_ms().saturating_sub(blocked_at) < PMC_BLOCK_WINDOW.as_millis() as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    fn now_ms() -> u64 {
        use std::sync::OnceLock;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        Instant::now().duration_since(epoch).as_millis() as u64
    }
}

/// The P2 manager.
pub struct FullTextManager {
    sources: Arc<SourceRegistry>,
    pmc_blocklist: Arc<PmcBlocklist>,
    batch_timeout: Duration,
    institutional_enabled: bool,
}

impl FullTextManager {
    /// Creates a manager over the given source registry.
    #[must_use]
    pub fn new(
        sources: Arc<SourceRegistry>,
        pmc_blocklist: Arc<PmcBlocklist>,
        batch_timeout: Duration,
        institutional_enabled: bool,
    ) -> Self {
        Self {
            sources,
            pmc_blocklist,
            batch_timeout,
            institutional_enabled,
        }
    }

    /// Collects and ranks candidate URLs for one publication.
    ///
    /// `cached` carries candidates already known to the registry from prior
    /// runs; they participate in ranking but PMC-hosted entries are stripped
    /// while PMC is blocked.
    #[instrument(skip(self, publication, cached), fields(pub_key = ?publication.ids.pub_key()))]
    pub async fn collect_urls(
        &self,
        publication: &PubRef,
        cached: &[UrlCandidate],
    ) -> UrlCollection {
        let mut source_statuses = HashMap::new();
        let mut candidates: Vec<UrlCandidate> = Vec::new();

        // Every source gets the same deadline; slow sources yield a timeout
        // status while the rest of the batch proceeds.
        let fetches = self.sources.url_sources().iter().map(|source| {
            let source = Arc::clone(source);
            let publication = publication.clone();
            let budget = self.batch_timeout;
            async move {
                let name = source.name();
                let outcome = tokio::time::timeout(budget, source.fetch_urls(&publication)).await;
                (name, outcome)
            }
        });

        for (name, outcome) in futures_util::future::join_all(fetches).await {
            match outcome {
                Ok(Ok(urls)) if urls.is_empty() => {
                    source_statuses.insert(name.to_string(), SourceOutcome::Empty);
                }
                Ok(Ok(urls)) => {
                    source_statuses.insert(name.to_string(), SourceOutcome::Ok(urls.len()));
                    candidates.extend(urls);
                }
                Ok(Err(SourceError::NotFound)) => {
                    source_statuses.insert(name.to_string(), SourceOutcome::NotFound);
                }
                Ok(Err(SourceError::Disabled)) => {
                    source_statuses.insert(
                        name.to_string(),
                        SourceOutcome::Denied("disabled".to_string()),
                    );
                }
                Ok(Err(SourceError::PermanentDenied(reason))) => {
                    source_statuses.insert(name.to_string(), SourceOutcome::Denied(reason));
                }
                Ok(Err(error)) => {
                    source_statuses
                        .insert(name.to_string(), SourceOutcome::Transient(error.to_string()));
                }
                Err(_elapsed) => {
                    source_statuses.insert(name.to_string(), SourceOutcome::TimedOut);
                }
            }
        }

        // Cached candidates were persisted with their boost already applied;
        // withdraw it so finalize does not apply it twice.
        candidates.extend(cached.iter().cloned().map(|mut c| {
            c.priority -= c.url_type.priority_boost();
            c
        }));

        let pmc_blocked = self.pmc_blocklist.is_blocked();
        if pmc_blocked {
            candidates.retain(|c| !classify::is_pmc_host(&c.url));
        }

        let mut ranked = finalize_candidates(candidates, self.institutional_enabled);

        // A publication left with nothing after the PMC strip (its only
        // candidates were PMC-hosted) gets one OpenAlex fallback lookup: a
        // cached PMC URL is never trusted alone.
        if pmc_blocked && ranked.is_empty() {
            match self.sources.openalex().fetch_oa_fallback(&publication.ids).await {
                Ok(fallback) => {
                    source_statuses.insert(
                        "openalex_fallback".to_string(),
                        SourceOutcome::Ok(fallback.len()),
                    );
                    ranked = finalize_candidates(fallback, self.institutional_enabled);
                }
                Err(error) => {
                    source_statuses.insert(
                        "openalex_fallback".to_string(),
                        SourceOutcome::Transient(error.to_string()),
                    );
                }
            }
        }

        let success = !ranked.is_empty();
        logfmt::log_event(
            if success { Status::Ok } else { Status::Fail },
            "fulltext",
            "URL collection finished",
            &[
                ("candidates", &ranked.len().to_string()),
                ("sources", &source_statuses.len().to_string()),
            ],
        );
        debug!(?source_statuses, "collection statuses");

        UrlCollection {
            success,
            all_urls: ranked,
            source_statuses,
        }
    }
}

/// Normalizes, classifies, boosts, deduplicates, and ranks candidates.
///
/// Sort is stable, so candidates that tie on adjusted priority keep their
/// source order.
fn finalize_candidates(candidates: Vec<UrlCandidate>, institutional_enabled: bool) -> Vec<UrlCandidate> {
    let mut seen = std::collections::HashSet::new();
    let mut finalized: Vec<UrlCandidate> = Vec::new();

    for mut candidate in candidates {
        candidate.url = normalize_url(&candidate.url);
        if !seen.insert(candidate.url.clone()) {
            continue;
        }

        let classified = classify::classify(&candidate.url);
        // Trust an explicit direct-pdf assignment from a source over a
        // pattern miss, but never the other way around.
        if classified != UrlType::Unknown || candidate.url_type == UrlType::Unknown {
            candidate.url_type = classified;
        }
        candidate.priority += candidate.url_type.priority_boost();

        if candidate.requires_auth && !institutional_enabled {
            // Kept in the list for diagnostics; the waterfall skips it.
            candidate
                .metadata
                .insert("auth_unavailable".to_string(), "true".to_string());
        }

        finalized.push(candidate);
    }

    finalized.sort_by_key(|c| c.priority);
    finalized
}
