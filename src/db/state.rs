//! Runtime state tracking: shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN: &str = "clean_shutdown";

impl Database {
    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session never reached
    /// [`set_clean_shutdown`](Self::set_clean_shutdown), i.e. it crashed or was killed.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.runtime_value(CLEAN_SHUTDOWN).await?;
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the coordinator is running
    ///
    /// Until [`set_clean_shutdown`](Self::set_clean_shutdown) is called, the next boot
    /// will see an unclean shutdown.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN, "false").await
    }

    /// Mark that the coordinator shut down gracefully
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_runtime_value(CLEAN_SHUTDOWN, "true").await
    }

    /// Read a runtime state value
    pub async fn runtime_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read runtime state '{}': {}",
                    key, e
                )))
            })
    }

    /// Write a runtime state value
    pub async fn set_runtime_value(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to write runtime state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }
}
