//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        ddl(
            &mut conn,
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
            "create schema_version table",
        )
        .await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: books and wanted tables
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        begin(conn, 1).await?;

        let result = async {
            ddl(
                conn,
                r#"
                CREATE TABLE books (
                    book_id TEXT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT '',
                    author TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'Skipped',
                    audio_status TEXT NOT NULL DEFAULT 'Skipped'
                )
                "#,
                "create books table",
            )
            .await?;

            // status: 0 skipped, 1 wanted, 2 pending, 3 snatched, 4 processed, 5 failed
            ddl(
                conn,
                r#"
                CREATE TABLE wanted (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    book_id TEXT NOT NULL,
                    source_url TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL,
                    size_bytes INTEGER,
                    provider TEXT NOT NULL DEFAULT '',
                    aux_info TEXT,
                    library INTEGER NOT NULL DEFAULT 0,
                    media_kind INTEGER NOT NULL,
                    status INTEGER NOT NULL DEFAULT 1,
                    backend_kind TEXT,
                    external_id TEXT,
                    submitted_at INTEGER,
                    result TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
                "create wanted table",
            )
            .await?;

            ddl(conn, "CREATE INDEX idx_wanted_status ON wanted(status)", "create index").await?;
            ddl(conn, "CREATE INDEX idx_wanted_book ON wanted(book_id)", "create index").await?;

            // At most one in-flight (pending/snatched) row per book
            ddl(
                conn,
                "CREATE UNIQUE INDEX idx_wanted_in_flight ON wanted(book_id) WHERE status IN (2, 3)",
                "create in-flight index",
            )
            .await?;

            record_migration(conn, 1).await
        }
        .await;

        finish(conn, 1, result).await
    }

    /// Migration v2: runtime state table for shutdown tracking
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        begin(conn, 2).await?;

        let result = async {
            ddl(
                conn,
                r#"
                CREATE TABLE IF NOT EXISTS runtime_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )
                "#,
                "create runtime_state table",
            )
            .await?;

            let now = chrono::Utc::now().timestamp();
            sqlx::query(
                "INSERT OR IGNORE INTO runtime_state (key, value, updated_at) VALUES ('clean_shutdown', 'false', ?)",
            )
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to seed runtime_state: {}",
                    e
                )))
            })?;

            record_migration(conn, 2).await
        }
        .await;

        finish(conn, 2, result).await
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn begin(conn: &mut SqliteConnection, version: i32) -> Result<()> {
    tracing::info!(version, "Applying database migration");
    sqlx::query("BEGIN")
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;
    Ok(())
}

/// Commit on success, roll back on failure
async fn finish(conn: &mut SqliteConnection, version: i32, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to commit migration v{}: {}",
                        version, e
                    )))
                })?;
            tracing::info!(version, "Database migration complete");
            Ok(())
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

async fn ddl(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "Failed to {}: {}",
            what, e
        )))
    })?;
    Ok(())
}

async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(version)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to record migration: {}",
                e
            )))
        })?;

    Ok(())
}
