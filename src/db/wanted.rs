//! Wanted item persistence and compare-and-set status transitions.
//!
//! Every status change is a single `UPDATE ... WHERE status = <expected>` statement, so
//! concurrent writers can never both win the same transition. The return value tells the
//! caller whether its transition happened.

use crate::error::DatabaseError;
use crate::types::{BackendHandle, BookId, NewWantedItem, WantedId, WantedItem, WantedStatus};
use crate::{Error, Result};

use super::{Database, WantedRow};

const WANTED_COLUMNS: &str = r#"
    id, book_id, source_url, title, size_bytes, provider, aux_info,
    library, media_kind, status, backend_kind, external_id, submitted_at,
    result, created_at, updated_at
"#;

impl Database {
    /// Record a search candidate, keyed on its source URL
    ///
    /// A new URL is inserted as Wanted. An existing Failed or Skipped row is reset to
    /// Wanted so it can be tried again; any other existing row is left untouched.
    /// Returns the row id and its status after the call.
    pub async fn insert_candidate(
        &self,
        candidate: &NewWantedItem,
    ) -> Result<(WantedId, WantedStatus)> {
        let now = chrono::Utc::now().timestamp();
        let size = candidate
            .size_bytes
            .map(|s| i64::try_from(s).unwrap_or(i64::MAX));

        let (id, status): (i64, i32) = sqlx::query_as(
            r#"
            INSERT INTO wanted (
                book_id, source_url, title, size_bytes, provider, aux_info,
                library, media_kind, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(source_url) DO UPDATE SET
                status = CASE WHEN wanted.status IN (0, 5) THEN 1 ELSE wanted.status END,
                result = CASE WHEN wanted.status IN (0, 5) THEN NULL ELSE wanted.result END,
                backend_kind = CASE WHEN wanted.status IN (0, 5) THEN NULL ELSE wanted.backend_kind END,
                external_id = CASE WHEN wanted.status IN (0, 5) THEN NULL ELSE wanted.external_id END,
                submitted_at = CASE WHEN wanted.status IN (0, 5) THEN NULL ELSE wanted.submitted_at END,
                updated_at = CASE WHEN wanted.status IN (0, 5) THEN excluded.updated_at ELSE wanted.updated_at END
            RETURNING id, status
            "#,
        )
        .bind(candidate.book_id.as_str())
        .bind(&candidate.source_url)
        .bind(&candidate.title)
        .bind(size)
        .bind(&candidate.provider)
        .bind(&candidate.aux_info)
        .bind(candidate.library.to_i32())
        .bind(candidate.media_kind.to_i32())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert wanted candidate: {}",
                e
            )))
        })?;

        Ok((WantedId(id), WantedStatus::from_i32(status)))
    }

    /// Get a wanted item by ID
    pub async fn get_wanted(&self, id: WantedId) -> Result<Option<WantedItem>> {
        let row = sqlx::query_as::<_, WantedRow>(&format!(
            "SELECT {} FROM wanted WHERE id = ?",
            WANTED_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get wanted item: {}",
                e
            )))
        })?;

        Ok(row.map(WantedItem::from))
    }

    /// List wanted items in a status, oldest first
    pub async fn list_wanted_by_status(&self, status: WantedStatus) -> Result<Vec<WantedItem>> {
        let rows = sqlx::query_as::<_, WantedRow>(&format!(
            "SELECT {} FROM wanted WHERE status = ? ORDER BY id ASC",
            WANTED_COLUMNS
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list wanted items by status: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(WantedItem::from).collect())
    }

    /// List every wanted item for a book, oldest first
    pub async fn list_wanted_for_book(&self, book_id: &BookId) -> Result<Vec<WantedItem>> {
        let rows = sqlx::query_as::<_, WantedRow>(&format!(
            "SELECT {} FROM wanted WHERE book_id = ? ORDER BY id ASC",
            WANTED_COLUMNS
        ))
        .bind(book_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list wanted items for book: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(WantedItem::from).collect())
    }

    /// Count wanted items in a status
    pub async fn count_by_status(&self, status: WantedStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wanted WHERE status = ?")
            .bind(status.to_i32())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count wanted items: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Claim a Wanted item for dispatch (Wanted -> Pending)
    ///
    /// Fails (returns false) when the item is not Wanted or when another item for the
    /// same book is already Pending or Snatched.
    pub async fn claim_for_dispatch(&self, id: WantedId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE wanted SET status = 2, updated_at = ?
            WHERE id = ? AND status = 1
              AND NOT EXISTS (
                  SELECT 1 FROM wanted other
                  WHERE other.book_id = wanted.book_id
                    AND other.id != wanted.id
                    AND other.status IN (2, 3)
              )
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            // Lost the race against the in-flight index
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim wanted item: {}",
                e
            )))),
        }
    }

    /// Rename a Pending item to the name its backend gave the task
    pub async fn set_pending_title(&self, id: WantedId, title: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE wanted SET title = ?, updated_at = ? WHERE id = ? AND status = 2",
        )
        .bind(title)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to rename wanted item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record backend acceptance (Pending -> Snatched)
    pub async fn mark_snatched(&self, id: WantedId, handle: &BackendHandle) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE wanted
            SET status = 3, backend_kind = ?, external_id = ?, submitted_at = ?,
                result = NULL, updated_at = ?
            WHERE id = ? AND status = 2
            "#,
        )
        .bind(handle.kind.as_str())
        .bind(&handle.external_id)
        .bind(handle.submitted_at.timestamp())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark wanted item snatched: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail an item that is currently in one of `from`, recording `reason`
    ///
    /// The backend handle is kept for operator visibility.
    pub async fn mark_failed(
        &self,
        id: WantedId,
        from: &[WantedStatus],
        reason: &str,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let now = chrono::Utc::now().timestamp();
        let allowed = from
            .iter()
            .map(|s| s.to_i32().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let result = sqlx::query(&format!(
            "UPDATE wanted SET status = 5, result = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            allowed
        ))
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark wanted item failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a confirmed import (Snatched -> Processed), clearing the backend handle
    pub async fn mark_processed(&self, id: WantedId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE wanted
            SET status = 4, backend_kind = NULL, external_id = NULL, submitted_at = NULL,
                result = NULL, updated_at = ?
            WHERE id = ? AND status = 3
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark wanted item processed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail every Pending row; used at boot
    ///
    /// No submission survives a restart, so a Pending row at boot was interrupted and
    /// whether the backend received it is unknown. Returns the number of rows failed.
    pub async fn fail_interrupted_pending(&self, reason: &str) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE wanted SET status = 5, result = ?, updated_at = ? WHERE status = 2",
        )
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fail interrupted submissions: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
