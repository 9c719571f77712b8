//! Layered cache: hot (redis projection), warm (authoritative disk), cold
//! (upstream SOFT bundles).
//!
//! Contract: `get = hot ?? warm ?? (cold -> populate warm -> populate hot)`.
//! All writes go through warm first, then best-effort to hot. The hot tier
//! may evict or vanish at any time; nothing is lost when it does.

mod hot;
mod soft;
mod warm;

pub use hot::{HotCache, HotCacheStats};
pub use soft::{SoftCache, SoftCleanupReport};
pub use warm::{DatasetManifest, ManifestEntry, StoredParsed, WarmStore, WarmStoreError, WarmStoreStats};

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

/// Combined health/stats snapshot across tiers.
#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub hot_enabled: bool,
    pub hot_reachable: bool,
    pub hot_hits: u64,
    pub hot_misses: u64,
    pub hot_hit_rate: f64,
    pub warm: WarmStoreStats,
}

/// The layered cache facade.
pub struct LayeredCache {
    hot: Arc<HotCache>,
    warm: Arc<WarmStore>,
    soft: Arc<SoftCache>,
}

impl LayeredCache {
    /// Assembles the facade over already-constructed tiers.
    #[must_use]
    pub fn new(hot: Arc<HotCache>, warm: Arc<WarmStore>, soft: Arc<SoftCache>) -> Self {
        Self { hot, warm, soft }
    }

    /// The hot tier.
    #[must_use]
    pub fn hot(&self) -> &Arc<HotCache> {
        &self.hot
    }

    /// The warm tier.
    #[must_use]
    pub fn warm(&self) -> &Arc<WarmStore> {
        &self.warm
    }

    /// The cold tier.
    #[must_use]
    pub fn soft(&self) -> &Arc<SoftCache> {
        &self.soft
    }

    /// Read-through lookup of parsed content by hash.
    ///
    /// Hot first; a warm hit back-fills the hot projection.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError`] only for warm-tier failures; hot-tier
    /// trouble silently degrades.
    #[instrument(skip(self))]
    pub async fn get_parsed(
        &self,
        content_sha256: &str,
    ) -> Result<Option<StoredParsed>, WarmStoreError> {
        let key = format!("parsed:{content_sha256}");

        if let Some(cached) = self.hot.get(&key).await
            && let Ok(stored) = serde_json::from_str::<StoredParsed>(&cached)
        {
            return Ok(Some(stored));
        }

        let Some(stored) = self.warm.read_parsed(content_sha256).await? else {
            return Ok(None);
        };

        if let Ok(json) = serde_json::to_string(&stored) {
            self.hot.set(&key, &json).await;
        }
        Ok(Some(stored))
    }

    /// Writes parsed content warm-first, then projects to hot.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError`] when the authoritative write fails; the
    /// hot projection is best-effort.
    #[instrument(skip(self, stored), fields(sha256 = %stored.content_sha256))]
    pub async fn put_parsed(&self, stored: &StoredParsed) -> Result<(), WarmStoreError> {
        self.warm.write_parsed(stored).await?;
        if let Ok(json) = serde_json::to_string(stored) {
            self.hot
                .set(&format!("parsed:{}", stored.content_sha256), &json)
                .await;
        }
        Ok(())
    }

    /// Pattern invalidation on the hot tier (`geo:GSE189*`).
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        self.hot.invalidate_pattern(pattern).await
    }

    /// Health and statistics across tiers.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError`] when warm-tier stats cannot be read.
    pub async fn report(&self) -> Result<CacheReport, WarmStoreError> {
        let warm = self.warm.stats().await?;
        Ok(CacheReport {
            hot_enabled: self.hot.is_enabled(),
            hot_reachable: self.hot.ping().await,
            hot_hits: self.hot.stats().hits(),
            hot_misses: self.hot.stats().misses(),
            hot_hit_rate: self.hot.stats().hit_rate(),
            warm,
        })
    }
}

impl std::fmt::Debug for LayeredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredCache")
            .field("hot", &self.hot)
            .field("warm_root", &self.warm.root())
            .finish_non_exhaustive()
    }
}
