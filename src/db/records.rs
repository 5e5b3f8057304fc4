//! Generic keyed record writes.
//!
//! Collaborators that own their own tables (metadata refresh, magazine issues, ...) write
//! through [`Database::upsert`]: update the row matching the key columns, insert it when
//! nothing matched. Table and column names are checked before they reach SQL.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;

use super::Database;

/// A single column value for [`Database::upsert`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// SQL NULL
    Null,
    /// INTEGER
    Integer(i64),
    /// REAL
    Real(f64),
    /// TEXT
    Text(String),
}

impl From<&str> for RecordValue {
    fn from(value: &str) -> Self {
        RecordValue::Text(value.to_string())
    }
}

impl From<String> for RecordValue {
    fn from(value: String) -> Self {
        RecordValue::Text(value)
    }
}

impl From<i64> for RecordValue {
    fn from(value: i64) -> Self {
        RecordValue::Integer(value)
    }
}

impl From<i32> for RecordValue {
    fn from(value: i32) -> Self {
        RecordValue::Integer(i64::from(value))
    }
}

impl From<f64> for RecordValue {
    fn from(value: f64) -> Self {
        RecordValue::Real(value)
    }
}

impl<T: Into<RecordValue>> From<Option<T>> for RecordValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RecordValue::Null, Into::into)
    }
}

/// What [`Database::upsert`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// An existing row matched the keys and was updated
    Updated,
    /// No row matched; a new one was inserted
    Inserted,
}

impl Database {
    /// Update the row of `table` matching `keys`, or insert one if none matched
    ///
    /// Both statements run in one transaction. Every identifier must be a plain SQL name
    /// (`[A-Za-z_][A-Za-z0-9_]*`), otherwise [`DatabaseError::InvalidIdentifier`] is returned
    /// and nothing is executed.
    pub async fn upsert(
        &self,
        table: &str,
        values: &[(&str, RecordValue)],
        keys: &[(&str, RecordValue)],
    ) -> Result<UpsertOutcome> {
        check_identifier(table)?;
        if keys.is_empty() {
            return Err(Error::Database(DatabaseError::QueryFailed(format!(
                "Upsert into {} needs at least one key column",
                table
            ))));
        }
        for (column, _) in values.iter().chain(keys.iter()) {
            check_identifier(column)?;
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin upsert transaction: {}",
                e
            )))
        })?;

        let where_clause = keys
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");

        let matched = if values.is_empty() {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, where_clause);
            let mut query = sqlx::query_scalar::<_, i64>(&sql);
            for (_, value) in keys {
                query = match value {
                    RecordValue::Null => query.bind(None::<String>),
                    RecordValue::Integer(v) => query.bind(*v),
                    RecordValue::Real(v) => query.bind(*v),
                    RecordValue::Text(v) => query.bind(v.as_str()),
                };
            }
            query.fetch_one(&mut *tx).await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to look up {} row: {}",
                    table, e
                )))
            })? > 0
        } else {
            let set_clause = values
                .iter()
                .map(|(c, _)| format!("{} = ?", c))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE {} SET {} WHERE {}", table, set_clause, where_clause);
            let mut query = sqlx::query(&sql);
            for (_, value) in values.iter().chain(keys.iter()) {
                query = bind_value(query, value);
            }
            let result = query.execute(&mut *tx).await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update {} row: {}",
                    table, e
                )))
            })?;
            result.rows_affected() > 0
        };

        let outcome = if matched {
            UpsertOutcome::Updated
        } else {
            let columns: Vec<&str> = values.iter().chain(keys.iter()).map(|(c, _)| *c).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for (_, value) in values.iter().chain(keys.iter()) {
                query = bind_value(query, value);
            }
            query.execute(&mut *tx).await.map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert {} row: {}",
                    table, e
                )))
            })?;
            UpsertOutcome::Inserted
        };

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit upsert into {}: {}",
                table, e
            )))
        })?;

        Ok(outcome)
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q RecordValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        RecordValue::Null => query.bind(None::<String>),
        RecordValue::Integer(v) => query.bind(*v),
        RecordValue::Real(v) => query.bind(*v),
        RecordValue::Text(v) => query.bind(v.as_str()),
    }
}

pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Database(DatabaseError::InvalidIdentifier(
            name.to_string(),
        )))
    }
}
