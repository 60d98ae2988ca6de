//! Persistent record store backed by `SQLite`.
//!
//! The store is the single source of truth for every record's durable state.
//! All operations are single atomic statements; in particular a progress
//! update writes the byte counter and the state together so a crash between
//! writes cannot leave an inconsistent record.

use sqlx::QueryBuilder;
use thiserror::Error;
use tracing::instrument;

use crate::db::Database;
use crate::record::{DownloadRecord, DownloadState};

/// Errors from record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No record exists with the given id.
    #[error("record not found: {0}")]
    RecordNotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise
/// [`StoreError::RecordNotFound`].
fn check_affected(id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::RecordNotFound(id.to_string()))
    } else {
        Ok(())
    }
}

/// Record store keyed by download id.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    /// Creates a new store over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts the record, or updates every mutable field if a record with
    /// the same id already exists. `created_at` is preserved on update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, record), fields(id = %record.id))]
    pub async fn insert_or_update(&self, record: &DownloadRecord) -> Result<()> {
        sqlx::query(
            r"INSERT INTO downloads (
                id,
                url,
                destination_path,
                wifi_only,
                priority,
                state,
                downloaded_bytes,
                total_bytes
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                destination_path = excluded.destination_path,
                wifi_only = excluded.wifi_only,
                priority = excluded.priority,
                state = excluded.state,
                downloaded_bytes = excluded.downloaded_bytes,
                total_bytes = excluded.total_bytes,
                updated_at = datetime('now')",
        )
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.destination_path)
        .bind(record.wifi_only)
        .bind(record.priority)
        .bind(record.state().as_str())
        .bind(record.downloaded_bytes)
        .bind(record.total_bytes)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Removes a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no record exists with the
    /// given id, or [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        check_affected(id, result.rows_affected())
    }

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let record = sqlx::query_as::<_, DownloadRecord>(r"SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(record)
    }

    /// Lists records whose state is in the given set, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find_all_by_state_in(
        &self,
        states: &[DownloadState],
    ) -> Result<Vec<DownloadRecord>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::new("SELECT * FROM downloads WHERE state IN (");
        let mut separated = builder.separated(", ");
        for state in states {
            separated.push_bind(state.as_str());
        }
        builder.push(") ORDER BY created_at DESC, id ASC");

        let records = builder
            .build_query_as::<DownloadRecord>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(records)
    }

    /// Updates the byte counter and state together in one statement.
    ///
    /// This is the only progress-write path, keeping the counter and the
    /// lifecycle state consistent under crashes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no record exists with the
    /// given id, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn update_progress(
        &self,
        id: &str,
        downloaded_bytes: i64,
        state: DownloadState,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET downloaded_bytes = ?, state = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(downloaded_bytes)
        .bind(state.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Sets a record's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no record exists with the
    /// given id, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_state(&self, id: &str, state: DownloadState) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET state = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Records the expected total size once it is known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] if no record exists with the
    /// given id, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn set_total_bytes(&self, id: &str, total_bytes: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET total_bytes = ?, updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(total_bytes)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Resets all in-progress records back to queued.
    ///
    /// Called at startup for crash recovery: a record left `in_progress`
    /// from a previous session is resumable, never complete.
    ///
    /// # Returns
    ///
    /// The number of records that were reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_in_progress(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET state = ?, updated_at = datetime('now')
              WHERE state = ?",
        )
        .bind(DownloadState::Queued.as_str())
        .bind(DownloadState::InProgress.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Whether any non-terminal records exist (queued, in progress or
    /// paused). Used by hosts to decide whether the engine should keep
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn has_pending(&self) -> Result<bool> {
        let count: (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM downloads WHERE state IN (?, ?, ?)",
        )
        .bind(DownloadState::Queued.as_str())
        .bind(DownloadState::InProgress.as_str())
        .bind(DownloadState::Paused.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(count.0 > 0)
    }

    /// Counts records in a given state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_state(&self, state: DownloadState) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(r"SELECT COUNT(*) FROM downloads WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(self.db.pool())
            .await?;

        Ok(count.0)
    }
}
