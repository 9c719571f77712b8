//! Cold-tier cache for raw SOFT bundles fetched from upstream services.
//!
//! Hidden behind the layered cache: consumers check hot/warm first and only
//! fall through here. Entries expire operationally via the age-based
//! cleanup, not by TTL.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use super::warm::WarmStoreError;
use crate::logfmt::{self, Status};

/// Report from one cleanup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SoftCleanupReport {
    pub examined: u64,
    pub deleted: u64,
    pub bytes_freed: u64,
    pub dry_run: bool,
}

/// The SOFT bundle cache.
#[derive(Debug, Clone)]
pub struct SoftCache {
    dir: PathBuf,
}

impl SoftCache {
    /// Creates a cache under `<root>/cache/soft`.
    #[must_use]
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            dir: storage_root.into().join("cache").join("soft"),
        }
    }

    /// Path of a dataset's SOFT bundle.
    #[must_use]
    pub fn bundle_path(&self, geo_id: &str) -> PathBuf {
        self.dir.join(format!("{geo_id}_family.soft.gz"))
    }

    /// Stores a raw bundle as fetched (already gzip from upstream).
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure.
    #[instrument(skip(self, bytes), fields(geo_id, bytes = bytes.len()))]
    pub async fn store(&self, geo_id: &str, bytes: &[u8]) -> Result<(), WarmStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let path = self.bundle_path(geo_id);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_error(&path, e))
    }

    /// Loads a bundle; `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure.
    pub async fn load(&self, geo_id: &str) -> Result<Option<Vec<u8>>, WarmStoreError> {
        let path = self.bundle_path(geo_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Deletes bundles older than `max_age_days`.
    ///
    /// With `dry_run` the report counts what would be deleted without
    /// touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure; a missing
    /// cache directory yields an empty report.
    #[instrument(skip(self))]
    pub async fn cleanup(
        &self,
        max_age_days: i64,
        dry_run: bool,
    ) -> Result<SoftCleanupReport, WarmStoreError> {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut report = SoftCleanupReport {
            dry_run,
            ..SoftCleanupReport::default()
        };

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            report.examined += 1;

            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            if modified >= cutoff {
                continue;
            }

            report.deleted += 1;
            report.bytes_freed += metadata.len();
            if !dry_run {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| io_error(&path, e))?;
            }
        }

        logfmt::log_event(
            Status::Ok,
            "cache",
            "SOFT cleanup finished",
            &[
                ("examined", &report.examined.to_string()),
                ("deleted", &report.deleted.to_string()),
                ("dry_run", &dry_run.to_string()),
            ],
        );
        Ok(report)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> WarmStoreError {
    WarmStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
