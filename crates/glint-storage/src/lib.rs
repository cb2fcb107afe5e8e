//! SQLite persistence for listings, scores, and profile lineage.

use chrono::{DateTime, Duration, Utc};
use glint_core::{JobListing, ListingDraft, ProfileVersion, RejectionRecord, ScoreRecord};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "glint-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("stored list column is not valid JSON: {0}")]
    ListColumn(#[from] serde_json::Error),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Outcome of recording a sighting of a canonical hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    /// First time this hash has been seen; a row was inserted.
    New,
    /// Known hash seen again outside the freshness window; reactivated and
    /// due for scoring under the current profile.
    Refreshed,
    /// Known hash inside the freshness window; only `last_seen` moved.
    Duplicate,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    canonical_hash  TEXT PRIMARY KEY,
    source          TEXT NOT NULL,
    title           TEXT NOT NULL,
    company         TEXT NOT NULL,
    url             TEXT NOT NULL,
    location        TEXT,
    description     TEXT NOT NULL DEFAULT '',
    requirement_text TEXT,
    employment_type TEXT,
    posted_date     TEXT,
    first_seen      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    applied         INTEGER NOT NULL DEFAULT 0,
    notified        INTEGER NOT NULL DEFAULT 0,
    rejected        INTEGER NOT NULL DEFAULT 0,
    annotations     TEXT,
    deactivated_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_listings_source ON listings(source);
CREATE INDEX IF NOT EXISTS idx_listings_active ON listings(active);
CREATE INDEX IF NOT EXISTS idx_listings_last_seen ON listings(last_seen);

CREATE TABLE IF NOT EXISTS scores (
    listing_hash    TEXT PRIMARY KEY REFERENCES listings(canonical_hash),
    score           INTEGER NOT NULL,
    matched         TEXT NOT NULL,
    unmatched       TEXT NOT NULL,
    key_points      TEXT NOT NULL,
    backend         TEXT NOT NULL,
    profile_version TEXT NOT NULL,
    scored_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS score_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_hash    TEXT NOT NULL,
    score           INTEGER NOT NULL,
    matched         TEXT NOT NULL,
    unmatched       TEXT NOT NULL,
    key_points      TEXT NOT NULL,
    backend         TEXT NOT NULL,
    profile_version TEXT NOT NULL,
    scored_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_score_history_listing
    ON score_history(listing_hash, profile_version);

CREATE TABLE IF NOT EXISTS profile_versions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    hash        TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rejections (
    listing_hash TEXT PRIMARY KEY REFERENCES listings(canonical_hash),
    category     TEXT NOT NULL,
    note         TEXT NOT NULL DEFAULT '',
    rejected_at  TEXT NOT NULL
);
"#;

#[derive(Debug, sqlx::FromRow)]
struct ScoreRow {
    listing_hash: String,
    score: i64,
    matched: String,
    unmatched: String,
    key_points: String,
    backend: String,
    profile_version: String,
    scored_at: DateTime<Utc>,
}

impl ScoreRow {
    fn into_record(self) -> Result<ScoreRecord> {
        Ok(ScoreRecord {
            listing_hash: self.listing_hash,
            score: self.score,
            matched: serde_json::from_str(&self.matched)?,
            unmatched: serde_json::from_str(&self.unmatched)?,
            key_points: serde_json::from_str(&self.key_points)?,
            backend: self.backend,
            profile_version: self.profile_version,
            scored_at: self.scored_at,
        })
    }
}

const LISTING_COLUMNS: &str = "canonical_hash, source, title, company, url, location, description, \
     requirement_text, employment_type, posted_date, first_seen, last_seen, \
     active, applied, notified, rejected, annotations";

fn listing_from_row(row: &sqlx::sqlite::SqliteRow) -> JobListing {
    JobListing {
        canonical_hash: row.get("canonical_hash"),
        source: row.get("source"),
        title: row.get("title"),
        company: row.get("company"),
        url: row.get("url"),
        location: row.get("location"),
        description: row.get("description"),
        requirement_text: row.get("requirement_text"),
        employment_type: row.get("employment_type"),
        posted_date: row.get("posted_date"),
        first_seen: row.get("first_seen"),
        last_seen: row.get("last_seen"),
        active: row.get("active"),
        applied: row.get("applied"),
        notified: row.get("notified"),
        rejected: row.get("rejected"),
        annotations: row.get("annotations"),
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new().connect(database_url).await?;
        Ok(Self { pool })
    }

    /// In-memory store on a single connection; every pool connection would
    /// otherwise get its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema bootstrap: the statement batch runs in one
    /// transaction.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // --- sightings / dedup ---

    /// Tier-2 check-and-touch: if the hash was last seen inside the freshness
    /// window, move `last_seen` forward and report `true` (a duplicate). One
    /// transaction, so a concurrent sighting cannot interleave between the
    /// read and the touch.
    pub async fn touch_duplicate(
        &self,
        canonical_hash: &str,
        seen_at: DateTime<Utc>,
        freshness_window: Duration,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_seen FROM listings WHERE canonical_hash = ?1")
                .bind(canonical_hash)
                .fetch_optional(&mut *tx)
                .await?;

        let duplicate = match existing {
            Some(last_seen) if seen_at - last_seen <= freshness_window => {
                sqlx::query(
                    "UPDATE listings SET last_seen = ?1, active = 1, deactivated_at = NULL \
                     WHERE canonical_hash = ?2",
                )
                .bind(seen_at)
                .bind(canonical_hash)
                .execute(&mut *tx)
                .await?;
                true
            }
            _ => false,
        };
        tx.commit().await?;
        if duplicate {
            debug!(hash = %canonical_hash, "duplicate sighting, touched last_seen");
        }
        Ok(duplicate)
    }

    /// Persist a draft that cleared every filter tier. Upserts on
    /// `canonical_hash`: two workers racing on the same new hash cannot
    /// produce two rows, the loser just refreshes the winner's row.
    pub async fn upsert_listing(&self, draft: &ListingDraft) -> Result<SightingOutcome> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_seen FROM listings WHERE canonical_hash = ?1")
                .bind(&draft.canonical_hash)
                .fetch_optional(&mut *tx)
                .await?;
        sqlx::query(
            "INSERT INTO listings (canonical_hash, source, title, company, url, location, \
                 description, requirement_text, employment_type, posted_date, \
                 first_seen, last_seen, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1) \
             ON CONFLICT(canonical_hash) DO UPDATE \
                 SET last_seen = excluded.last_seen, description = excluded.description, \
                     requirement_text = excluded.requirement_text, \
                     active = 1, deactivated_at = NULL",
        )
        .bind(&draft.canonical_hash)
        .bind(&draft.source)
        .bind(&draft.title)
        .bind(&draft.company)
        .bind(&draft.url)
        .bind(&draft.location)
        .bind(&draft.description)
        .bind(&draft.requirement_text)
        .bind(&draft.employment_type)
        .bind(&draft.posted_date)
        .bind(draft.fetched_at)
        .bind(draft.fetched_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let outcome = if existing.is_some() {
            SightingOutcome::Refreshed
        } else {
            SightingOutcome::New
        };
        debug!(hash = %draft.canonical_hash, ?outcome, "persisted listing");
        Ok(outcome)
    }

    /// Soft-deactivate listings not sighted within the retention period.
    /// Flag flip with timestamp; rows are never deleted.
    pub async fn deactivate_stale(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let cutoff = now - retention;
        let result = sqlx::query(
            "UPDATE listings SET active = 0, deactivated_at = ?1 \
             WHERE active = 1 AND last_seen < ?2",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_listing(&self, canonical_hash: &str) -> Result<Option<JobListing>> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE canonical_hash = ?1"
        ))
        .bind(canonical_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(listing_from_row))
    }

    /// Active, non-rejected listings with no current score. Drives both the
    /// normal scoring queue and idempotent resume after a cancelled run.
    pub async fn unscored_listings(&self) -> Result<Vec<JobListing>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings l \
             LEFT JOIN scores s ON s.listing_hash = l.canonical_hash \
             WHERE s.listing_hash IS NULL AND l.active = 1 AND l.rejected = 0 \
             ORDER BY l.first_seen"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(listing_from_row).collect())
    }

    /// Recent (title, company, hash) triples for the near-duplicate advisory
    /// scan.
    pub async fn recent_identities(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query(
            "SELECT title, company, canonical_hash FROM listings WHERE last_seen >= ?1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("title"), row.get("company"), row.get("canonical_hash")))
            .collect())
    }

    // --- scores ---

    /// Install `record` as the current score, archiving any previous current
    /// score into history. At most one current row per listing survives.
    pub async fn replace_score(&self, record: &ScoreRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO score_history (listing_hash, score, matched, unmatched, key_points, \
                 backend, profile_version, scored_at) \
             SELECT listing_hash, score, matched, unmatched, key_points, backend, \
                 profile_version, scored_at \
             FROM scores WHERE listing_hash = ?1",
        )
        .bind(&record.listing_hash)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO scores (listing_hash, score, matched, unmatched, key_points, backend, \
                 profile_version, scored_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(listing_hash) DO UPDATE SET \
                 score = excluded.score, matched = excluded.matched, \
                 unmatched = excluded.unmatched, key_points = excluded.key_points, \
                 backend = excluded.backend, profile_version = excluded.profile_version, \
                 scored_at = excluded.scored_at",
        )
        .bind(&record.listing_hash)
        .bind(record.score)
        .bind(serde_json::to_string(&record.matched)?)
        .bind(serde_json::to_string(&record.unmatched)?)
        .bind(serde_json::to_string(&record.key_points)?)
        .bind(&record.backend)
        .bind(&record.profile_version)
        .bind(record.scored_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn current_score(&self, listing_hash: &str) -> Result<Option<ScoreRecord>> {
        let row: Option<ScoreRow> = sqlx::query_as(
            "SELECT listing_hash, score, matched, unmatched, key_points, backend, \
                 profile_version, scored_at \
             FROM scores WHERE listing_hash = ?1",
        )
        .bind(listing_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ScoreRow::into_record).transpose()
    }

    /// Archived score records for one listing, oldest first.
    pub async fn score_history(&self, listing_hash: &str) -> Result<Vec<ScoreRecord>> {
        let rows: Vec<ScoreRow> = sqlx::query_as(
            "SELECT listing_hash, score, matched, unmatched, key_points, backend, \
                 profile_version, scored_at \
             FROM score_history WHERE listing_hash = ?1 ORDER BY id",
        )
        .bind(listing_hash)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ScoreRow::into_record).collect()
    }

    /// Rescore candidates: current score inside the borderline band, first
    /// seen inside the age window, scored under a different profile version.
    pub async fn listings_for_rescore(
        &self,
        band_min: i64,
        band_max: i64,
        max_age: Duration,
        exclude_version: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobListing, i64)>> {
        let cutoff = now - max_age;
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS}, s.score AS old_score \
             FROM listings l \
             JOIN scores s ON s.listing_hash = l.canonical_hash \
             WHERE s.score BETWEEN ?1 AND ?2 \
               AND l.first_seen >= ?3 \
               AND s.profile_version != ?4 \
               AND l.active = 1 AND l.rejected = 0 \
             ORDER BY l.first_seen"
        ))
        .bind(band_min)
        .bind(band_max)
        .bind(cutoff)
        .bind(exclude_version)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (listing_from_row(row), row.get::<i64, _>("old_score")))
            .collect())
    }

    /// Listings at or above `threshold` that the notifier has not picked up.
    pub async fn high_scoring_unnotified(
        &self,
        threshold: i64,
    ) -> Result<Vec<(JobListing, i64)>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS}, s.score AS score \
             FROM listings l \
             JOIN scores s ON s.listing_hash = l.canonical_hash \
             WHERE s.score >= ?1 AND l.notified = 0 AND l.active = 1 AND l.rejected = 0 \
             ORDER BY s.score DESC"
        ))
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (listing_from_row(row), row.get::<i64, _>("score")))
            .collect())
    }

    // --- consumer metadata writes; none of these re-trigger filtering or scoring ---

    pub async fn mark_notified(&self, canonical_hash: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET notified = 1 WHERE canonical_hash = ?1")
            .bind(canonical_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_applied(&self, canonical_hash: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET applied = 1 WHERE canonical_hash = ?1")
            .bind(canonical_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn annotate(&self, canonical_hash: &str, note: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET annotations = ?1 WHERE canonical_hash = ?2")
            .bind(note)
            .bind(canonical_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn reject_listing(
        &self,
        canonical_hash: &str,
        category: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE listings SET rejected = 1 WHERE canonical_hash = ?1")
            .bind(canonical_hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO rejections (listing_hash, category, note, rejected_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(listing_hash) DO UPDATE SET \
                 category = excluded.category, note = excluded.note, \
                 rejected_at = excluded.rejected_at",
        )
        .bind(canonical_hash)
        .bind(category)
        .bind(note)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_rejection(&self, canonical_hash: &str) -> Result<Option<RejectionRecord>> {
        let row = sqlx::query(
            "SELECT listing_hash, category, note, rejected_at \
             FROM rejections WHERE listing_hash = ?1",
        )
        .bind(canonical_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| RejectionRecord {
            listing_hash: row.get("listing_hash"),
            category: row.get("category"),
            note: row.get("note"),
            rejected_at: row.get("rejected_at"),
        }))
    }

    // --- profile lineage ---

    pub async fn latest_profile_version(&self) -> Result<Option<ProfileVersion>> {
        let row = sqlx::query(
            "SELECT hash, recorded_at FROM profile_versions ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| ProfileVersion {
            hash: row.get("hash"),
            recorded_at: row.get("recorded_at"),
        }))
    }

    pub async fn record_profile_version(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO profile_versions (hash, recorded_at) VALUES (?1, ?2)")
            .bind(hash)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
