//! Book record reads and guarded status writes.

use crate::error::DatabaseError;
use crate::types::{BookId, BookStatus, Library};
use crate::{Error, Result};

use super::records::RecordValue;
use super::{BookRecord, BookRow, Database, UpsertOutcome};

impl Database {
    /// Insert or update a book record
    pub async fn upsert_book(&self, book: &BookRecord) -> Result<UpsertOutcome> {
        self.upsert(
            "books",
            &[
                ("title", RecordValue::from(book.title.as_str())),
                ("author", RecordValue::from(book.author.as_str())),
                ("status", RecordValue::from(book.status.as_str())),
                ("audio_status", RecordValue::from(book.audio_status.as_str())),
            ],
            &[("book_id", RecordValue::from(book.book_id.as_str()))],
        )
        .await
    }

    /// Get a book by ID
    pub async fn get_book(&self, book_id: &BookId) -> Result<Option<BookRecord>> {
        let row = sqlx::query_as::<_, BookRow>(
            r#"
            SELECT book_id, title, author, status, audio_status
            FROM books
            WHERE book_id = ?
            "#,
        )
        .bind(book_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get book: {}",
                e
            )))
        })?;

        Ok(row.map(BookRecord::from))
    }

    /// Whether the book is known to the bibliographic store
    pub async fn book_exists(&self, book_id: &BookId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE book_id = ?")
            .bind(book_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check book existence: {}",
                    e
                )))
            })?;

        Ok(count > 0)
    }

    /// Set the status of one edition of a book
    ///
    /// With `only_if`, the write happens only while the edition is in that status.
    /// Returns whether a row changed.
    pub async fn set_book_status(
        &self,
        book_id: &BookId,
        library: Library,
        to: BookStatus,
        only_if: Option<BookStatus>,
    ) -> Result<bool> {
        let column = library.status_column();
        let result = match only_if {
            Some(expected) => {
                sqlx::query(&format!(
                    "UPDATE books SET {col} = ? WHERE book_id = ? AND {col} = ?",
                    col = column
                ))
                .bind(to.as_str())
                .bind(book_id.as_str())
                .bind(expected.as_str())
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE books SET {} = ? WHERE book_id = ?",
                    column
                ))
                .bind(to.as_str())
                .bind(book_id.as_str())
                .execute(&self.pool)
                .await
            }
        }
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set book status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }
}
