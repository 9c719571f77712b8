//! The GEO registry: single source of truth for persisted pipeline state.
//!
//! The registry owns its SQLite store outright: [`Registry::open`] builds
//! the pool with WAL mode (cheap concurrent snapshot reads), a busy
//! timeout, and foreign-key enforcement (link rows can never outlive their
//! dataset or publication), then runs migrations. All multi-statement
//! writes run in one transaction behind a writer mutex; reads are plain
//! snapshot queries. Attempt history is append-only, publication
//! identifiers are monotonic, and completeness never regresses except
//! through explicit invalidation.

mod record;

pub use record::{
    CompleteGeoData, CompletenessLevel, DatasetRow, DatasetStatistics, DownloadAttemptRow,
    EnrichmentJobRow, ParsedRef, PublicationBundle, PublicationRow, Relationship, Stage,
    UrlCandidateRow,
};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::cache::StoredParsed;
use crate::discovery::ScoredPublication;
use crate::download::{AttemptRecord, AttemptStatus};
use crate::ident::{IdentError, PubIds};
use crate::source::UrlCandidate;

/// Pool size for the registry store.
/// Kept low for SQLite since it uses file-level locking.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// How long a connection waits on a lock before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to run registry migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error(transparent)]
    Ident(#[from] IdentError),
}

/// Result alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Metadata input for dataset upserts; `None` fields leave existing values.
#[derive(Debug, Clone, Default)]
pub struct DatasetMetadata {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<i64>,
    pub submission_date: Option<String>,
    pub publication_date: Option<String>,
    pub pubmed_ids: Vec<String>,
}

/// File facts of a successful download, persisted with its attempt row.
#[derive(Debug, Clone)]
pub struct SuccessInfo {
    pub file_path: String,
    pub file_size: i64,
    pub sha256: String,
}

/// The registry.
#[derive(Debug, Clone)]
pub struct Registry {
    pool: SqlitePool,
    /// Serializes multi-statement writes; reads bypass it.
    writer: Arc<Mutex<()>>,
}

impl Registry {
    /// Opens (or creates) the registry store at `db_path` and runs pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] when the connection fails, or
    /// [`RegistryError::Migration`] when migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Opens an in-memory registry for tests.
    ///
    /// WAL mode is pointless without a file, but foreign keys stay on so
    /// tests exercise the same referential rules as production.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Database`] when the connection fails, or
    /// [`RegistryError::Migration`] when migrations fail.
    #[instrument]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Gracefully closes the pool; the registry must not be used after.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // ---- datasets ----------------------------------------------------

    /// Creates or refreshes a dataset row. Identifier and completeness are
    /// never touched by a metadata refresh; absent fields keep their stored
    /// values.
    #[instrument(skip(self, metadata))]
    pub async fn upsert_dataset(&self, geo_id: &str, metadata: &DatasetMetadata) -> Result<()> {
        let _guard = self.writer.lock().await;
        let pubmed_ids =
            serde_json::to_string(&metadata.pubmed_ids).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r"INSERT INTO datasets
                  (geo_id, title, summary, organism, platform, sample_count,
                   submission_date, publication_date, pubmed_ids)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (geo_id) DO UPDATE SET
                  title = COALESCE(excluded.title, datasets.title),
                  summary = COALESCE(excluded.summary, datasets.summary),
                  organism = COALESCE(excluded.organism, datasets.organism),
                  platform = COALESCE(excluded.platform, datasets.platform),
                  sample_count = COALESCE(excluded.sample_count, datasets.sample_count),
                  submission_date = COALESCE(excluded.submission_date, datasets.submission_date),
                  publication_date = COALESCE(excluded.publication_date, datasets.publication_date),
                  pubmed_ids = CASE WHEN excluded.pubmed_ids = '[]'
                                    THEN datasets.pubmed_ids
                                    ELSE excluded.pubmed_ids END,
                  updated_at = datetime('now')",
        )
        .bind(geo_id)
        .bind(&metadata.title)
        .bind(&metadata.summary)
        .bind(&metadata.organism)
        .bind(&metadata.platform)
        .bind(metadata.sample_count)
        .bind(&metadata.submission_date)
        .bind(&metadata.publication_date)
        .bind(&pubmed_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reads one dataset row.
    pub async fn get_dataset(&self, geo_id: &str) -> Result<Option<DatasetRow>> {
        let row = sqlx::query_as::<_, DatasetRow>(r"SELECT * FROM datasets WHERE geo_id = ?")
            .bind(geo_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Current completeness level; missing dataset is an error.
    pub async fn completeness(&self, geo_id: &str) -> Result<CompletenessLevel> {
        self.get_dataset(geo_id)
            .await?
            .map(|d| d.completeness())
            .ok_or_else(|| RegistryError::UnknownDataset(geo_id.to_string()))
    }

    /// Raises the completeness level. Monotonic: a lower target is a no-op.
    #[instrument(skip(self))]
    pub async fn update_completeness(
        &self,
        geo_id: &str,
        level: CompletenessLevel,
    ) -> Result<CompletenessLevel> {
        let _guard = self.writer.lock().await;
        let current = self
            .get_dataset(geo_id)
            .await?
            .map(|d| d.completeness())
            .ok_or_else(|| RegistryError::UnknownDataset(geo_id.to_string()))?;

        if level <= current {
            return Ok(current);
        }

        sqlx::query(
            r"UPDATE datasets SET completeness = ?, updated_at = datetime('now')
              WHERE geo_id = ?",
        )
        .bind(level.as_str())
        .bind(geo_id)
        .execute(&self.pool)
        .await?;
        debug!(geo_id, from = %current, to = %level, "completeness advanced");
        Ok(level)
    }

    /// Explicit invalidation: resets completeness to the floor and clears
    /// per-stage job state. The only sanctioned regression path.
    #[instrument(skip(self))]
    pub async fn invalidate_enrichment(&self, geo_id: &str) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"UPDATE datasets SET completeness = 'metadata_only', updated_at = datetime('now')
              WHERE geo_id = ?",
        )
        .bind(geo_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(r"DELETE FROM enrichment_jobs WHERE geo_id = ?")
            .bind(geo_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---- publications ------------------------------------------------

    /// Creates or enriches a publication from a discovery result.
    ///
    /// Identifier monotonicity is enforced in SQL: stored ids win over
    /// incoming ones, missing ids fill in.
    ///
    /// # Errors
    ///
    /// Returns [`IdentError::NoIdentifier`] via [`RegistryError::Ident`]
    /// when the record carries no identifier at all.
    #[instrument(skip(self, publication))]
    pub async fn upsert_publication(&self, publication: &ScoredPublication) -> Result<String> {
        let _guard = self.writer.lock().await;
        let record = &publication.record;
        let pub_key = record.ids.pub_key()?;
        let authors =
            serde_json::to_string(&record.authors).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"INSERT INTO publications
                  (pub_key, pmid, pmcid, doi, arxiv_id, title, authors, journal,
                   year, "abstract", citation_count, discovery_source,
                   quality_score, quality_band)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (pub_key) DO UPDATE SET
                  pmid = COALESCE(publications.pmid, excluded.pmid),
                  pmcid = COALESCE(publications.pmcid, excluded.pmcid),
                  doi = COALESCE(publications.doi, excluded.doi),
                  arxiv_id = COALESCE(publications.arxiv_id, excluded.arxiv_id),
                  title = CASE WHEN excluded.title != '' THEN excluded.title
                               ELSE publications.title END,
                  authors = CASE WHEN excluded.authors != '[]' THEN excluded.authors
                                 ELSE publications.authors END,
                  journal = COALESCE(publications.journal, excluded.journal),
                  year = COALESCE(publications.year, excluded.year),
                  "abstract" = COALESCE(publications."abstract", excluded."abstract"),
                  citation_count = COALESCE(excluded.citation_count, publications.citation_count),
                  discovery_source = COALESCE(publications.discovery_source, excluded.discovery_source),
                  quality_score = COALESCE(excluded.quality_score, publications.quality_score),
                  quality_band = COALESCE(excluded.quality_band, publications.quality_band),
                  updated_at = datetime('now')"#,
        )
        .bind(&pub_key)
        .bind(&record.ids.pmid)
        .bind(&record.ids.pmcid)
        .bind(&record.ids.doi)
        .bind(&record.ids.arxiv_id)
        .bind(&record.title)
        .bind(&authors)
        .bind(&record.journal)
        .bind(record.year)
        .bind(&record.abstract_text)
        .bind(record.citation_count)
        .bind(&publication.discovery_source)
        .bind(publication.quality.score)
        .bind(publication.quality.band.as_str())
        .execute(&self.pool)
        .await?;

        Ok(pub_key)
    }

    /// Reads one publication row.
    pub async fn get_publication(&self, pub_key: &str) -> Result<Option<PublicationRow>> {
        let row =
            sqlx::query_as::<_, PublicationRow>(r"SELECT * FROM publications WHERE pub_key = ?")
                .bind(pub_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    /// The identifier set of a stored publication.
    pub async fn publication_ids(&self, pub_key: &str) -> Result<Option<PubIds>> {
        Ok(self.get_publication(pub_key).await?.map(|row| PubIds {
            pmid: row.pmid,
            pmcid: row.pmcid,
            doi: row.doi,
            arxiv_id: row.arxiv_id,
        }))
    }

    /// Links a publication to a dataset. Idempotent per `(geo, pub, rel)`.
    #[instrument(skip(self))]
    pub async fn link(
        &self,
        geo_id: &str,
        pub_key: &str,
        relationship: Relationship,
        strategy: Option<&str>,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            r"INSERT OR IGNORE INTO dataset_publications
                  (geo_id, pub_key, relationship, discovery_strategy)
              VALUES (?, ?, ?, ?)",
        )
        .bind(geo_id)
        .bind(pub_key)
        .bind(relationship.as_str())
        .bind(strategy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Publications linked to a dataset, with their relationship.
    pub async fn publications_for(
        &self,
        geo_id: &str,
    ) -> Result<Vec<(PublicationRow, Relationship)>> {
        let rows = sqlx::query(
            r"SELECT p.*, dp.relationship AS link_relationship
              FROM dataset_publications dp
              JOIN publications p ON p.pub_key = dp.pub_key
              WHERE dp.geo_id = ?
              ORDER BY dp.relationship, p.pub_key",
        )
        .bind(geo_id)
        .fetch_all(&self.pool)
        .await?;

        let mut publications = Vec::with_capacity(rows.len());
        for row in rows {
            let publication = PublicationRow::from_row(&row)?;
            let relationship = row
                .get::<String, _>("link_relationship")
                .parse()
                .unwrap_or(Relationship::Citing);
            publications.push((publication, relationship));
        }
        Ok(publications)
    }

    // ---- URL candidates ----------------------------------------------

    /// Persists observed candidates. Existing `(pub_key, url)` rows are
    /// kept untouched so the retry set stays stable across runs.
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub async fn record_candidates(
        &self,
        pub_key: &str,
        candidates: &[UrlCandidate],
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        for candidate in candidates {
            let metadata = serde_json::to_string(&candidate.metadata).ok();
            sqlx::query(
                r"INSERT OR IGNORE INTO url_candidates
                      (pub_key, url, source, url_type, priority, confidence,
                       requires_auth, metadata)
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(pub_key)
            .bind(&candidate.url)
            .bind(&candidate.source)
            .bind(candidate.url_type.as_str())
            .bind(i64::from(candidate.priority))
            .bind(candidate.confidence)
            .bind(i64::from(candidate.requires_auth))
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Candidate rows for a publication, blacklisted ones excluded unless
    /// asked for.
    pub async fn candidates_for(
        &self,
        pub_key: &str,
        include_blacklisted: bool,
    ) -> Result<Vec<UrlCandidateRow>> {
        let sql = if include_blacklisted {
            r"SELECT * FROM url_candidates WHERE pub_key = ? ORDER BY priority, id"
        } else {
            r"SELECT * FROM url_candidates WHERE pub_key = ? AND blacklisted = 0
              ORDER BY priority, id"
        };
        let rows = sqlx::query_as::<_, UrlCandidateRow>(sql)
            .bind(pub_key)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Flags or clears the blacklist bit for every candidate whose URL
    /// matches a LIKE pattern (host-wide blocks).
    #[instrument(skip(self))]
    pub async fn set_blacklisted_like(&self, url_like: &str, blacklisted: bool) -> Result<u64> {
        let _guard = self.writer.lock().await;
        let result = sqlx::query(r"UPDATE url_candidates SET blacklisted = ? WHERE url LIKE ?")
            .bind(i64::from(blacklisted))
            .bind(url_like)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---- download attempts -------------------------------------------

    /// Appends a waterfall's attempt history in one transaction.
    ///
    /// The success attempt (at most one exists per publication; the partial
    /// unique index backs this up) carries the file facts. A publication
    /// that already has a success row keeps it: later successes are ignored
    /// rather than duplicated.
    #[instrument(skip(self, attempts, success), fields(count = attempts.len()))]
    pub async fn record_attempts(
        &self,
        pub_key: &str,
        attempts: &[AttemptRecord],
        success: Option<&SuccessInfo>,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        for attempt in attempts {
            let is_success = attempt.status == AttemptStatus::Success;
            let info = if is_success { success } else { None };
            sqlx::query(
                r"INSERT OR IGNORE INTO download_attempts
                      (pub_key, url, source, status, http_status, error,
                       file_path, file_size, sha256, attempted_at)
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(pub_key)
            .bind(&attempt.url)
            .bind(&attempt.source)
            .bind(attempt.status.as_str())
            .bind(attempt.http_status.map(i64::from))
            .bind(&attempt.error)
            .bind(info.map(|i| i.file_path.clone()))
            .bind(info.map(|i| i.file_size))
            .bind(info.map(|i| i.sha256.clone()))
            .bind(attempt.attempted_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Full attempt history for a publication, oldest first.
    pub async fn attempts_for(&self, pub_key: &str) -> Result<Vec<DownloadAttemptRow>> {
        let rows = sqlx::query_as::<_, DownloadAttemptRow>(
            r"SELECT * FROM download_attempts WHERE pub_key = ? ORDER BY id",
        )
        .bind(pub_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The success attempt, when one exists.
    pub async fn successful_attempt(&self, pub_key: &str) -> Result<Option<DownloadAttemptRow>> {
        let row = sqlx::query_as::<_, DownloadAttemptRow>(
            r"SELECT * FROM download_attempts WHERE pub_key = ? AND status = 'success'",
        )
        .bind(pub_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ---- parsed content ----------------------------------------------

    /// Records parsed content and links the publication to its hash.
    #[instrument(skip(self, stored), fields(sha256 = %stored.content_sha256))]
    pub async fn set_parsed(&self, pub_key: &str, stored: &StoredParsed) -> Result<()> {
        let _guard = self.writer.lock().await;
        let section_tokens = serde_json::to_string(
            &stored
                .sections
                .iter()
                .map(|(k, v)| (k.clone(), v.split_whitespace().count()))
                .collect::<HashMap<String, usize>>(),
        )
        .unwrap_or_else(|_| "{}".to_string());

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"INSERT OR IGNORE INTO parsed_content
                  (content_sha256, parser, quality_score, section_tokens, parsed_at)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&stored.content_sha256)
        .bind(&stored.parser)
        .bind(stored.quality_score)
        .bind(&section_tokens)
        .bind(stored.parsed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"INSERT INTO publication_content (pub_key, content_sha256)
              VALUES (?, ?)
              ON CONFLICT (pub_key) DO UPDATE SET content_sha256 = excluded.content_sha256",
        )
        .bind(pub_key)
        .bind(&stored.content_sha256)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// The parsed-content reference for a publication.
    pub async fn parsed_ref(&self, pub_key: &str) -> Result<Option<ParsedRef>> {
        let row = sqlx::query_as::<_, ParsedRef>(
            r"SELECT pc.content_sha256, pc.quality_score, pc.parser
              FROM publication_content link
              JOIN parsed_content pc ON pc.content_sha256 = link.content_sha256
              WHERE link.pub_key = ?",
        )
        .bind(pub_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ---- enrichment jobs ---------------------------------------------

    /// Per-stage job state, when any attempt has been recorded.
    pub async fn job_state(&self, geo_id: &str, stage: Stage) -> Result<Option<EnrichmentJobRow>> {
        let row = sqlx::query_as::<_, EnrichmentJobRow>(
            r"SELECT * FROM enrichment_jobs WHERE geo_id = ? AND stage = ?",
        )
        .bind(geo_id)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Records a stage success, resetting its retry counter.
    #[instrument(skip(self))]
    pub async fn record_job_success(&self, geo_id: &str, stage: Stage) -> Result<()> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            r"INSERT INTO enrichment_jobs (geo_id, stage, status, last_attempt_at, retry_count)
              VALUES (?, ?, 'succeeded', ?, 0)
              ON CONFLICT (geo_id, stage) DO UPDATE SET
                  status = 'succeeded', last_attempt_at = excluded.last_attempt_at,
                  retry_count = 0, last_error = NULL",
        )
        .bind(geo_id)
        .bind(stage.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a stage failure, advancing the retry counter and poisoning
    /// the job once `max_retries` is reached.
    #[instrument(skip(self, error))]
    pub async fn record_job_failure(
        &self,
        geo_id: &str,
        stage: Stage,
        error: &str,
        max_retries: u32,
    ) -> Result<EnrichmentJobRow> {
        let _guard = self.writer.lock().await;
        sqlx::query(
            r"INSERT INTO enrichment_jobs
                  (geo_id, stage, status, last_attempt_at, retry_count, last_error)
              VALUES (?, ?, 'failed', ?, 1, ?)
              ON CONFLICT (geo_id, stage) DO UPDATE SET
                  retry_count = enrichment_jobs.retry_count + 1,
                  status = CASE WHEN enrichment_jobs.retry_count + 1 >= ?
                                THEN 'poisoned' ELSE 'failed' END,
                  last_attempt_at = excluded.last_attempt_at,
                  last_error = excluded.last_error",
        )
        .bind(geo_id)
        .bind(stage.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(i64::from(max_retries))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, EnrichmentJobRow>(
            r"SELECT * FROM enrichment_jobs WHERE geo_id = ? AND stage = ?",
        )
        .bind(geo_id)
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // ---- complete view -----------------------------------------------

    /// Assembles the complete indexed view of a dataset: metadata,
    /// publications with candidates, attempt history, parsed refs, and
    /// aggregate statistics.
    #[instrument(skip(self))]
    pub async fn get_complete(&self, geo_id: &str) -> Result<Option<CompleteGeoData>> {
        let Some(dataset) = self.get_dataset(geo_id).await? else {
            return Ok(None);
        };

        let linked = self.publications_for(geo_id).await?;
        let mut publications = Vec::with_capacity(linked.len());
        let mut statistics = DatasetStatistics::default();

        for (publication, relationship) in linked {
            match relationship {
                Relationship::Original => statistics.original += 1,
                Relationship::Citing => statistics.citing += 1,
            }

            let candidates = self.candidates_for(&publication.pub_key, false).await?;
            let attempts = self.attempts_for(&publication.pub_key).await?;
            let parsed = self.parsed_ref(&publication.pub_key).await?;

            if attempts.iter().any(|a| a.status == "success") {
                statistics.successful_downloads += 1;
            } else if !attempts.is_empty() {
                statistics.failed_downloads += 1;
            }

            publications.push(PublicationBundle {
                publication,
                relationship,
                candidates,
                attempts,
                parsed,
            });
        }

        let attempted = statistics.successful_downloads + statistics.failed_downloads;
        statistics.success_rate = if attempted == 0 {
            0.0
        } else {
            statistics.successful_downloads as f64 / attempted as f64
        };

        Ok(Some(CompleteGeoData {
            dataset,
            publications,
            statistics,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::quality::{QualityAssessment, QualityBand};
    use crate::source::CitationRecord;

    async fn registry() -> Registry {
        Registry::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_open_with_tempfile_creates_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("registry.db");

        let registry = Registry::open(&db_path).await.unwrap();
        registry
            .upsert_dataset("GSE52564", &DatasetMetadata::default())
            .await
            .unwrap();
        registry.close().await;
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_rejects_invalid_relationship() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();
        registry.upsert_publication(&scored("1", "T")).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO dataset_publications (geo_id, pub_key, relationship)
             VALUES ('GSE1', 'pmid-1', 'unrelated')",
        )
        .execute(&registry.pool)
        .await;
        assert!(
            result.is_err(),
            "invalid relationship should be rejected by CHECK constraint"
        );
    }

    #[tokio::test]
    async fn test_schema_enforces_single_success_attempt() {
        let registry = registry().await;
        registry.upsert_publication(&scored("1", "T")).await.unwrap();

        sqlx::query(
            "INSERT INTO download_attempts (pub_key, url, source, status)
             VALUES ('pmid-1', 'https://a', 'pmc', 'success')",
        )
        .execute(&registry.pool)
        .await
        .unwrap();

        let second = sqlx::query(
            "INSERT INTO download_attempts (pub_key, url, source, status)
             VALUES ('pmid-1', 'https://b', 'unpaywall', 'success')",
        )
        .execute(&registry.pool)
        .await;
        assert!(
            second.is_err(),
            "second success row must violate the partial unique index"
        );

        // Failed attempts remain unlimited.
        let failed = sqlx::query(
            "INSERT INTO download_attempts (pub_key, url, source, status)
             VALUES ('pmid-1', 'https://c', 'core', 'failed')",
        )
        .execute(&registry.pool)
        .await;
        assert!(failed.is_ok());
    }

    #[tokio::test]
    async fn test_schema_enforces_link_foreign_keys() {
        let registry = registry().await;
        // Neither the dataset nor the publication exists.
        let result = sqlx::query(
            "INSERT INTO dataset_publications (geo_id, pub_key, relationship)
             VALUES ('GSE404', 'pmid-404', 'citing')",
        )
        .execute(&registry.pool)
        .await;
        assert!(result.is_err(), "orphan link rows must be rejected");
    }

    fn scored(pmid: &str, title: &str) -> ScoredPublication {
        ScoredPublication {
            record: CitationRecord {
                ids: PubIds::sanitized(Some(pmid), None, None, None),
                title: title.to_string(),
                ..CitationRecord::default()
            },
            discovery_source: "pubmed".to_string(),
            quality: QualityAssessment {
                score: 0.5,
                band: QualityBand::Acceptable,
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_dataset_partial_refresh_keeps_fields() {
        let registry = registry().await;
        registry
            .upsert_dataset(
                "GSE52564",
                &DatasetMetadata {
                    title: Some("Original title".to_string()),
                    organism: Some("Mus musculus".to_string()),
                    ..DatasetMetadata::default()
                },
            )
            .await
            .unwrap();

        // A refresh with missing fields must not blank them.
        registry
            .upsert_dataset(
                "GSE52564",
                &DatasetMetadata {
                    summary: Some("New summary".to_string()),
                    ..DatasetMetadata::default()
                },
            )
            .await
            .unwrap();

        let dataset = registry.get_dataset("GSE52564").await.unwrap().unwrap();
        assert_eq!(dataset.title.as_deref(), Some("Original title"));
        assert_eq!(dataset.organism.as_deref(), Some("Mus musculus"));
        assert_eq!(dataset.summary.as_deref(), Some("New summary"));
    }

    #[tokio::test]
    async fn test_completeness_is_monotonic() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();

        registry
            .update_completeness("GSE1", CompletenessLevel::WithPdfs)
            .await
            .unwrap();
        // A lower write is ignored.
        let level = registry
            .update_completeness("GSE1", CompletenessLevel::WithCitations)
            .await
            .unwrap();
        assert_eq!(level, CompletenessLevel::WithPdfs);
        assert_eq!(
            registry.completeness("GSE1").await.unwrap(),
            CompletenessLevel::WithPdfs
        );
    }

    #[tokio::test]
    async fn test_invalidate_enrichment_is_the_only_regression() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();
        registry
            .update_completeness("GSE1", CompletenessLevel::FullyEnriched)
            .await
            .unwrap();

        registry.invalidate_enrichment("GSE1").await.unwrap();
        assert_eq!(
            registry.completeness("GSE1").await.unwrap(),
            CompletenessLevel::MetadataOnly
        );
    }

    #[tokio::test]
    async fn test_publication_identifier_monotonicity() {
        let registry = registry().await;
        let mut publication = scored("123", "A paper");
        publication.record.ids.doi = Some("10.1/a".to_string());
        let key = registry.upsert_publication(&publication).await.unwrap();

        // Second sighting with a conflicting DOI: the stored one wins.
        let mut second = scored("123", "A paper");
        second.record.ids.doi = Some("10.9/other".to_string());
        second.record.ids.pmcid = Some("PMC77".to_string());
        registry.upsert_publication(&second).await.unwrap();

        let row = registry.get_publication(&key).await.unwrap().unwrap();
        assert_eq!(row.doi.as_deref(), Some("10.1/a"), "stored id never changes");
        assert_eq!(row.pmcid.as_deref(), Some("PMC77"), "missing id fills in");
    }

    #[tokio::test]
    async fn test_link_many_to_many() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();
        registry
            .upsert_dataset("GSE2", &DatasetMetadata::default())
            .await
            .unwrap();
        let key = registry
            .upsert_publication(&scored("1", "Shared"))
            .await
            .unwrap();

        registry
            .link("GSE1", &key, Relationship::Original, Some("seed"))
            .await
            .unwrap();
        registry
            .link("GSE2", &key, Relationship::Citing, None)
            .await
            .unwrap();
        // Re-linking is idempotent.
        registry
            .link("GSE1", &key, Relationship::Original, Some("seed"))
            .await
            .unwrap();

        assert_eq!(registry.publications_for("GSE1").await.unwrap().len(), 1);
        assert_eq!(registry.publications_for("GSE2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_retained_and_blacklist_flag() {
        let registry = registry().await;
        let key = registry
            .upsert_publication(&scored("1", "Paper"))
            .await
            .unwrap();

        let candidates = vec![
            UrlCandidate::new(
                "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/pdf/",
                "pmc",
                crate::classify::UrlType::DirectPdf,
                8,
            ),
            UrlCandidate::new(
                "https://example.org/a.pdf",
                "unpaywall",
                crate::classify::UrlType::DirectPdf,
                18,
            ),
        ];
        registry.record_candidates(&key, &candidates).await.unwrap();
        // Recording again never duplicates.
        registry.record_candidates(&key, &candidates).await.unwrap();
        assert_eq!(registry.candidates_for(&key, true).await.unwrap().len(), 2);

        let flagged = registry
            .set_blacklisted_like("%ncbi.nlm.nih.gov%", true)
            .await
            .unwrap();
        assert_eq!(flagged, 1);
        assert_eq!(
            registry.candidates_for(&key, false).await.unwrap().len(),
            1,
            "blacklisted candidates drop from the default read"
        );
        assert_eq!(
            registry.candidates_for(&key, true).await.unwrap().len(),
            2,
            "rows are never deleted"
        );
    }

    #[tokio::test]
    async fn test_attempts_append_only_with_single_success() {
        let registry = registry().await;
        let key = registry
            .upsert_publication(&scored("1", "Paper"))
            .await
            .unwrap();

        let attempts = vec![
            AttemptRecord {
                url: "https://a".to_string(),
                source: "pmc".to_string(),
                status: AttemptStatus::Paywalled,
                http_status: Some(403),
                error: Some("HTTP 403".to_string()),
                attempted_at: Utc::now(),
            },
            AttemptRecord {
                url: "https://b".to_string(),
                source: "unpaywall".to_string(),
                status: AttemptStatus::Success,
                http_status: Some(200),
                error: None,
                attempted_at: Utc::now(),
            },
        ];
        let success = SuccessInfo {
            file_path: "pdfs/GSE1/original/pmid-1.pdf".to_string(),
            file_size: 2048,
            sha256: "abc".to_string(),
        };
        registry
            .record_attempts(&key, &attempts, Some(&success))
            .await
            .unwrap();

        let history = registry.attempts_for(&key).await.unwrap();
        assert_eq!(history.len(), 2);

        let winner = registry.successful_attempt(&key).await.unwrap().unwrap();
        assert_eq!(winner.sha256.as_deref(), Some("abc"));
        assert_eq!(winner.file_size, Some(2048));

        // A later run recording another success is ignored, not duplicated.
        let second_success = vec![AttemptRecord {
            url: "https://c".to_string(),
            source: "core".to_string(),
            status: AttemptStatus::Success,
            http_status: Some(200),
            error: None,
            attempted_at: Utc::now(),
        }];
        registry
            .record_attempts(&key, &second_success, Some(&success))
            .await
            .unwrap();
        let winner_after = registry.successful_attempt(&key).await.unwrap().unwrap();
        assert_eq!(winner_after.url, "https://b", "original success row immutable");
    }

    #[tokio::test]
    async fn test_parsed_content_shared_across_publications() {
        let registry = registry().await;
        let key_a = registry
            .upsert_publication(&scored("1", "Paper A"))
            .await
            .unwrap();
        let key_b = registry
            .upsert_publication(&scored("2", "Paper B"))
            .await
            .unwrap();

        let sections = crate::extract::segment("Results\nShared content body.");
        let stored = StoredParsed {
            content_sha256: sections.content_sha256(),
            sections: sections.sections_owned(),
            tables: Vec::new(),
            figures: Vec::new(),
            quality_score: 0.3,
            parser: "geolit-lopdf/1".to_string(),
            parsed_at: Utc::now(),
        };

        registry.set_parsed(&key_a, &stored).await.unwrap();
        registry.set_parsed(&key_b, &stored).await.unwrap();

        let ref_a = registry.parsed_ref(&key_a).await.unwrap().unwrap();
        let ref_b = registry.parsed_ref(&key_b).await.unwrap().unwrap();
        assert_eq!(ref_a.content_sha256, ref_b.content_sha256);
    }

    #[tokio::test]
    async fn test_job_failure_ladder_poisons_at_max() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();

        let row = registry
            .record_job_failure("GSE1", Stage::Citations, "timeout", 3)
            .await
            .unwrap();
        assert_eq!(row.retry_count, 1);
        assert_eq!(row.status, "failed");

        registry
            .record_job_failure("GSE1", Stage::Citations, "timeout", 3)
            .await
            .unwrap();
        let row = registry
            .record_job_failure("GSE1", Stage::Citations, "timeout", 3)
            .await
            .unwrap();
        assert_eq!(row.retry_count, 3);
        assert_eq!(row.status, "poisoned");

        // Success resets the ladder.
        registry
            .record_job_success("GSE1", Stage::Citations)
            .await
            .unwrap();
        let row = registry
            .job_state("GSE1", Stage::Citations)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.status, "succeeded");
    }

    #[tokio::test]
    async fn test_get_complete_aggregates_statistics() {
        let registry = registry().await;
        registry
            .upsert_dataset("GSE1", &DatasetMetadata::default())
            .await
            .unwrap();

        let key_orig = registry
            .upsert_publication(&scored("1", "Original paper"))
            .await
            .unwrap();
        let key_cite = registry
            .upsert_publication(&scored("2", "Citing paper"))
            .await
            .unwrap();
        registry
            .link("GSE1", &key_orig, Relationship::Original, None)
            .await
            .unwrap();
        registry
            .link("GSE1", &key_cite, Relationship::Citing, None)
            .await
            .unwrap();

        registry
            .record_attempts(
                &key_orig,
                &[AttemptRecord {
                    url: "https://a".to_string(),
                    source: "pmc".to_string(),
                    status: AttemptStatus::Success,
                    http_status: Some(200),
                    error: None,
                    attempted_at: Utc::now(),
                }],
                Some(&SuccessInfo {
                    file_path: "p.pdf".to_string(),
                    file_size: 9,
                    sha256: "x".to_string(),
                }),
            )
            .await
            .unwrap();
        registry
            .record_attempts(
                &key_cite,
                &[AttemptRecord {
                    url: "https://b".to_string(),
                    source: "crossref".to_string(),
                    status: AttemptStatus::Failed,
                    http_status: Some(404),
                    error: Some("HTTP 404".to_string()),
                    attempted_at: Utc::now(),
                }],
                None,
            )
            .await
            .unwrap();

        let complete = registry.get_complete("GSE1").await.unwrap().unwrap();
        assert_eq!(complete.publications.len(), 2);
        assert_eq!(complete.statistics.original, 1);
        assert_eq!(complete.statistics.citing, 1);
        assert_eq!(complete.statistics.successful_downloads, 1);
        assert_eq!(complete.statistics.failed_downloads, 1);
        assert!((complete.statistics.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_get_complete_unknown_dataset_is_none() {
        let registry = registry().await;
        assert!(registry.get_complete("GSE404").await.unwrap().is_none());
    }
}
