//! Per-source rate limiting for outbound bibliographic requests.
//!
//! Each source has a minimum interval between requests (the inverse of its
//! token rate); requests to different sources never wait on each other. A
//! server-mandated `Retry-After` can tighten a source's next slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EnrichConfig;

/// Warning threshold for cumulative delay per source (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum honored Retry-After value (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// E-utilities interval without an API key (3 req/s).
const EUTILS_INTERVAL_NO_KEY: Duration = Duration::from_millis(334);

/// E-utilities interval with an API key (10 req/s).
const EUTILS_INTERVAL_WITH_KEY: Duration = Duration::from_millis(100);

/// Per-source rate limiter.
///
/// Designed to be wrapped in `Arc` and shared by every source client.
/// `DashMap` gives lock-free access to per-source state; the inner
/// `tokio::sync::Mutex` serializes the read-update of each source's last
/// request instant.
#[derive(Debug)]
pub struct RateLimiter {
    default_interval: Duration,
    /// Source-specific intervals overriding the default.
    intervals: DashMap<String, Duration>,
    /// Per-source state.
    /// Arc lets the DashMap shard lock drop before awaiting the inner Mutex.
    sources: DashMap<String, Arc<SourceState>>,
}

#[derive(Debug)]
struct SourceState {
    last_request: Mutex<Option<Instant>>,
    /// One-shot extra delay recorded from a Retry-After header, in ms.
    mandated_delay_ms: AtomicU64,
    cumulative_delay_ms: AtomicU64,
}

impl SourceState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            mandated_delay_ms: AtomicU64::new(0),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

impl RateLimiter {
    /// Creates a limiter with the given default per-source interval.
    #[must_use]
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: DashMap::new(),
            sources: DashMap::new(),
        }
    }

    /// Creates the limiter used by the default registry, deriving the
    /// E-utilities interval from whether an NCBI API key is configured.
    #[must_use]
    pub fn for_config(config: &EnrichConfig) -> Self {
        let limiter = Self::new(Duration::from_millis(200));
        let eutils = if config.ncbi_api_key.is_some() {
            EUTILS_INTERVAL_WITH_KEY
        } else {
            EUTILS_INTERVAL_NO_KEY
        };
        limiter.set_interval("pubmed", eutils);
        limiter.set_interval("pmc", eutils);
        // Semantic Scholar throttles aggressively without a key.
        limiter.set_interval("semantic_scholar", Duration::from_millis(1100));
        limiter
    }

    /// Overrides the interval for one source.
    pub fn set_interval(&self, source: &str, interval: Duration) {
        self.intervals.insert(source.to_string(), interval);
    }

    /// Waits until a request to `source` is allowed, then claims the slot.
    pub async fn acquire(&self, source: &str) {
        let interval = self
            .intervals
            .get(source)
            .map_or(self.default_interval, |entry| *entry.value());

        let state = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(SourceState::new()))
            .clone();

        let mandated = Duration::from_millis(state.mandated_delay_ms.swap(0, Ordering::SeqCst));
        let required_gap = interval.max(mandated);

        let mut last = state.last_request.lock().await;
        let now = Instant::now();

        if let Some(previous) = *last {
            let elapsed = now.duration_since(previous);
            if elapsed < required_gap {
                let wait = required_gap - elapsed;
                let total = state.add_cumulative_delay(wait);
                if total >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        source,
                        total_delay_ms = total.as_millis(),
                        "cumulative rate-limit delay is high"
                    );
                }
                debug!(source, wait_ms = wait.as_millis(), "rate limit wait");
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }

    /// Records a server-mandated delay (Retry-After) for the next request.
    pub fn record_rate_limit(&self, source: &str, delay: Duration) {
        let capped = delay.min(MAX_RETRY_AFTER);
        let state = self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(SourceState::new()))
            .clone();
        #[allow(clippy::cast_possible_truncation)]
        state
            .mandated_delay_ms
            .store(capped.as_millis() as u64, Ordering::SeqCst);
        debug!(source, delay_ms = capped.as_millis(), "recorded Retry-After delay");
    }
}

/// Parses a Retry-After header value: either delta-seconds or an HTTP-date.
///
/// Returns `None` for unparseable values.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = httpdate::parse_http_date(trimmed).ok()?;
    when.duration_since(SystemTime::now()).ok()
}
