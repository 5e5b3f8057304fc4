//! Database layer for librarian-dl
//!
//! Handles SQLite persistence for wanted items, the book records they belong to and
//! runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: database lifecycle, schema migrations
//! - `wanted`: wanted item upserts and compare-and-set status transitions
//! - `books`: book status reads and guarded writes
//! - `records`: generic keyed upsert for collaborator tables
//! - `state`: runtime state (shutdown tracking, boot recovery)

use crate::types::{
    BackendHandle, BackendKind, BookId, BookStatus, Library, MediaKind, WantedId, WantedItem,
    WantedStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod books;
mod migrations;
mod records;
mod state;
mod wanted;

pub use records::{RecordValue, UpsertOutcome};

/// Wanted row as stored (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct WantedRow {
    pub id: i64,
    pub book_id: String,
    pub source_url: String,
    pub title: String,
    pub size_bytes: Option<i64>,
    pub provider: String,
    pub aux_info: Option<String>,
    pub library: i32,
    pub media_kind: i32,
    pub status: i32,
    pub backend_kind: Option<String>,
    pub external_id: Option<String>,
    pub submitted_at: Option<i64>,
    pub result: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<WantedRow> for WantedItem {
    fn from(row: WantedRow) -> Self {
        let handle = row
            .backend_kind
            .as_deref()
            .and_then(BackendKind::parse)
            .map(|kind| BackendHandle {
                kind,
                external_id: row.external_id.clone(),
                submitted_at: timestamp(row.submitted_at.unwrap_or(row.created_at)),
            });

        WantedItem {
            id: WantedId(row.id),
            book_id: BookId(row.book_id),
            source_url: row.source_url,
            title: row.title,
            size_bytes: row.size_bytes.and_then(|s| u64::try_from(s).ok()),
            provider: row.provider,
            aux_info: row.aux_info,
            library: Library::from_i32(row.library),
            media_kind: MediaKind::from_i32(row.media_kind),
            status: WantedStatus::from_i32(row.status),
            handle,
            result: row.result,
            created_at: timestamp(row.created_at),
            updated_at: timestamp(row.updated_at),
        }
    }
}

/// Book record from the bibliographic store
#[derive(Debug, Clone, PartialEq)]
pub struct BookRecord {
    /// Stable book identifier
    pub book_id: BookId,
    /// Title
    pub title: String,
    /// Author display name
    pub author: String,
    /// Ebook status
    pub status: BookStatus,
    /// Audiobook status
    pub audio_status: BookStatus,
}

impl BookRecord {
    /// Book with both editions in the given status
    pub fn new(
        book_id: impl Into<BookId>,
        title: impl Into<String>,
        author: impl Into<String>,
        status: BookStatus,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            title: title.into(),
            author: author.into(),
            status,
            audio_status: status,
        }
    }

    /// Status of the given edition
    pub fn status_for(&self, library: Library) -> BookStatus {
        match library {
            Library::Ebook => self.status,
            Library::Audiobook => self.audio_status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct BookRow {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub status: String,
    pub audio_status: String,
}

impl From<BookRow> for BookRecord {
    fn from(row: BookRow) -> Self {
        BookRecord {
            book_id: BookId(row.book_id),
            title: row.title,
            author: row.author,
            status: BookStatus::parse(&row.status),
            audio_status: BookStatus::parse(&row.audio_status),
        }
    }
}

/// Unix seconds to UTC, falling back to now for out-of-range values
pub(crate) fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for librarian-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
