//! Warm-tier store: the authoritative on-disk layout.
//!
//! ```text
//! <root>/
//!   geo/                             registry database
//!   pdfs/<geo_id>/original/<pub_key>.pdf
//!   pdfs/<geo_id>/citing/<pub_key>.pdf
//!   pdfs/<geo_id>/metadata.json
//!   parsed/<content_sha256>.json.gz
//!   cache/soft/<geo_id>_family.soft.gz
//! ```
//!
//! Parsed content is stored gzip-compressed under its content hash; the
//! registry indexes into this layout.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::extract::{ParsedContent, SectionMap};

/// Warm-store errors.
#[derive(Debug, Error)]
pub enum WarmStoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt stored content at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Serialized form of parsed content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredParsed {
    pub content_sha256: String,
    pub sections: BTreeMap<String, String>,
    pub tables: Vec<String>,
    pub figures: Vec<String>,
    pub quality_score: f64,
    pub parser: String,
    pub parsed_at: DateTime<Utc>,
}

impl StoredParsed {
    /// Converts extraction output into its storage form.
    #[must_use]
    pub fn from_parsed(content: &ParsedContent) -> Self {
        Self {
            content_sha256: content.content_sha256.clone(),
            sections: content.sections.sections_owned(),
            tables: content.sections.tables.clone(),
            figures: content.sections.figures.clone(),
            quality_score: content.quality_score,
            parser: content.parser.to_string(),
            parsed_at: content.parsed_at,
        }
    }

    /// Rebuilds the section map from storage.
    #[must_use]
    pub fn section_map(&self) -> SectionMap {
        SectionMap::from_stored(&self.sections, self.tables.clone(), self.figures.clone())
    }
}

/// Per-dataset manifest written next to the PDFs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub geo_id: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub publications: Vec<ManifestEntry>,
}

/// One publication's inventory line in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub pub_key: String,
    pub relationship: String,
    pub pdf_file: Option<String>,
    pub sha256: Option<String>,
    pub attempts: usize,
}

/// Aggregate numbers for the stats surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmStoreStats {
    pub parsed_entries: u64,
    pub parsed_bytes: u64,
    pub pdf_files: u64,
    pub pdf_bytes: u64,
}

/// The warm tier.
#[derive(Debug, Clone)]
pub struct WarmStore {
    root: PathBuf,
}

impl WarmStore {
    /// Creates a store rooted at `root`; directories appear lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a parsed-content blob.
    #[must_use]
    pub fn parsed_path(&self, content_sha256: &str) -> PathBuf {
        self.root
            .join("parsed")
            .join(format!("{content_sha256}.json.gz"))
    }

    /// Path of a publication's PDF within a dataset.
    #[must_use]
    pub fn pdf_path(&self, geo_id: &str, relationship: &str, pub_key: &str) -> PathBuf {
        self.root
            .join("pdfs")
            .join(geo_id)
            .join(relationship)
            .join(format!("{pub_key}.pdf"))
    }

    /// Path of a dataset's manifest.
    #[must_use]
    pub fn manifest_path(&self, geo_id: &str) -> PathBuf {
        self.root.join("pdfs").join(geo_id).join("metadata.json")
    }

    /// Persists parsed content under its hash, gzip-compressed.
    ///
    /// Idempotent: an existing blob for the same hash is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure.
    #[instrument(skip(self, stored), fields(sha256 = %stored.content_sha256))]
    pub async fn write_parsed(&self, stored: &StoredParsed) -> Result<(), WarmStoreError> {
        let path = self.parsed_path(&stored.content_sha256);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let json = serde_json::to_vec(stored)
            .map_err(|e| corrupt(&path, format!("serialize: {e}")))?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(|e| io_error(&path, e))?;
        let compressed = encoder.finish().map_err(|e| io_error(&path, e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&path, compressed)
            .await
            .map_err(|e| io_error(&path, e))
    }

    /// Loads parsed content by hash; `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Corrupt`] when the blob exists but cannot
    /// be decoded.
    #[instrument(skip(self))]
    pub async fn read_parsed(
        &self,
        content_sha256: &str,
    ) -> Result<Option<StoredParsed>, WarmStoreError> {
        let path = self.parsed_path(content_sha256);
        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| corrupt(&path, format!("gunzip: {e}")))?;

        let stored: StoredParsed = serde_json::from_slice(&json)
            .map_err(|e| corrupt(&path, format!("deserialize: {e}")))?;
        Ok(Some(stored))
    }

    /// Writes a dataset manifest.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure.
    #[instrument(skip(self, manifest), fields(geo_id = %manifest.geo_id))]
    pub async fn write_manifest(&self, manifest: &DatasetManifest) -> Result<(), WarmStoreError> {
        let path = self.manifest_path(&manifest.geo_id);
        let json = serde_json::to_vec_pretty(manifest)
            .map_err(|e| corrupt(&path, format!("serialize: {e}")))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| io_error(&path, e))
    }

    /// Entry counts and byte totals for the stats surface.
    ///
    /// # Errors
    ///
    /// Returns [`WarmStoreError::Io`] on filesystem failure; missing
    /// directories count as empty.
    pub async fn stats(&self) -> Result<WarmStoreStats, WarmStoreError> {
        let mut stats = WarmStoreStats::default();

        let (entries, bytes) = dir_totals(&self.root.join("parsed"), Some("gz")).await?;
        stats.parsed_entries = entries;
        stats.parsed_bytes = bytes;

        let (files, bytes) = dir_totals_recursive(&self.root.join("pdfs"), Some("pdf")).await?;
        stats.pdf_files = files;
        stats.pdf_bytes = bytes;

        Ok(stats)
    }
}

/// Counts files and bytes directly inside `dir`.
async fn dir_totals(dir: &Path, extension: Option<&str>) -> Result<(u64, u64), WarmStoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(io_error(dir, e)),
    };

    let mut count = 0u64;
    let mut bytes = 0u64;
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
        let path = entry.path();
        if let Some(wanted) = extension
            && path.extension().and_then(|e| e.to_str()) != Some(wanted)
        {
            continue;
        }
        if let Ok(metadata) = entry.metadata().await
            && metadata.is_file()
        {
            count += 1;
            bytes += metadata.len();
        }
    }
    Ok((count, bytes))
}

/// Counts files and bytes under `dir`, two levels deep (dataset/relationship).
async fn dir_totals_recursive(
    dir: &Path,
    extension: Option<&str>,
) -> Result<(u64, u64), WarmStoreError> {
    let mut stack = vec![dir.to_path_buf()];
    let mut count = 0u64;
    let mut bytes = 0u64;

    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(io_error(&current, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&current, e))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                stack.push(path);
            } else if extension.is_none()
                || path.extension().and_then(|e| e.to_str()) == extension
            {
                count += 1;
                bytes += metadata.len();
            }
        }
    }
    Ok((count, bytes))
}

fn io_error(path: &Path, source: std::io::Error) -> WarmStoreError {
    WarmStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, reason: String) -> WarmStoreError {
    WarmStoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    }
}
