//! Hot-tier cache: a best-effort redis projection of warm-tier state.
//!
//! Every operation degrades gracefully: a missing or unreachable server
//! turns the tier into a no-op and consumers fall through to the warm
//! store, which is authoritative. Keys are namespaced (`geo:`, `pub:`,
//! `parsed:`, `search:`, `discovery:`) and each namespace carries its own
//! TTL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use crate::logfmt::{self, Status};

/// TTL for GEO metadata projections (30 days).
const TTL_GEO: Duration = Duration::from_secs(30 * 24 * 3600);

/// TTL for parsed-content summaries (7 days).
const TTL_PARSED: Duration = Duration::from_secs(7 * 24 * 3600);

/// TTL for search results (24 hours).
const TTL_SEARCH: Duration = Duration::from_secs(24 * 3600);

/// TTL for discovery results (30 days).
const TTL_DISCOVERY: Duration = Duration::from_secs(30 * 24 * 3600);

/// Hit/miss counters for the stats surface.
#[derive(Debug, Default)]
pub struct HotCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HotCacheStats {
    /// Total hits since startup.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses since startup.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in [0, 1]; zero lookups count as 0.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// The hot tier.
pub struct HotCache {
    connection: Option<MultiplexedConnection>,
    stats: HotCacheStats,
}

impl HotCache {
    /// Connects to redis, degrading to a disabled tier on any failure.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            debug!("no redis URL configured; hot tier disabled");
            return Self::disabled();
        };

        let connection = match redis::Client::open(url) {
            Ok(client) => match client.get_multiplexed_tokio_connection().await {
                Ok(connection) => Some(connection),
                Err(error) => {
                    logfmt::log_event(
                        Status::Warn,
                        "cache",
                        "redis unreachable; operating warm-only",
                        &[("error", &error.to_string())],
                    );
                    None
                }
            },
            Err(error) => {
                logfmt::log_event(
                    Status::Warn,
                    "cache",
                    "invalid redis URL; operating warm-only",
                    &[("error", &error.to_string())],
                );
                None
            }
        };

        Self {
            connection,
            stats: HotCacheStats::default(),
        }
    }

    /// A permanently disabled hot tier.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            connection: None,
            stats: HotCacheStats::default(),
        }
    }

    /// True when a server connection exists.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> &HotCacheStats {
        &self.stats
    }

    /// TTL assigned to a namespaced key.
    #[must_use]
    pub fn ttl_for_key(key: &str) -> Duration {
        match key.split(':').next().unwrap_or_default() {
            "parsed" => TTL_PARSED,
            "search" => TTL_SEARCH,
            "discovery" => TTL_DISCOVERY,
            // geo:, pub:, and anything unrecognized share the long TTL.
            _ => TTL_GEO,
        }
    }

    /// Best-effort read.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut connection = self.connection.clone()?;
        match connection.get::<_, Option<String>>(key).await {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(error) => {
                warn!(key, error = %error, "hot cache read failed");
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Best-effort write with the key's namespace TTL.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) {
        let Some(mut connection) = self.connection.clone() else {
            return;
        };
        let ttl = Self::ttl_for_key(key).as_secs();
        if let Err(error) = connection.set_ex::<_, _, ()>(key, value, ttl).await {
            warn!(key, error = %error, "hot cache write failed");
        }
    }

    /// Deletes every key matching a glob pattern (`geo:GSE189*`).
    ///
    /// Returns the number of keys removed. SCAN-based so large keyspaces
    /// never block the server.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let Some(mut connection) = self.connection.clone() else {
            return 0;
        };

        let keys: Vec<String> = {
            let mut iter = match connection.scan_match::<_, String>(pattern).await {
                Ok(iter) => iter,
                Err(error) => {
                    warn!(pattern, error = %error, "hot cache scan failed");
                    return 0;
                }
            };
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return 0;
        }

        match connection.del::<_, u64>(keys).await {
            Ok(removed) => {
                logfmt::log_event(
                    Status::Ok,
                    "cache",
                    "pattern invalidation",
                    &[("pattern", pattern), ("removed", &removed.to_string())],
                );
                removed
            }
            Err(error) => {
                warn!(pattern, error = %error, "hot cache delete failed");
                0
            }
        }
    }

    /// One PING round-trip; false when disabled or unreachable.
    pub async fn ping(&self) -> bool {
        let Some(mut connection) = self.connection.clone() else {
            return false;
        };
        let pong: redis::RedisResult<String> =
            redis::cmd("PING").query_async(&mut connection).await;
        pong.is_ok()
    }
}

impl std::fmt::Debug for HotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotCache")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
