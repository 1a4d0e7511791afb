// crates/mctech-worker/src/executor.rs
// ============================================================================
// Module: SQL Executor
// Description: Async seam for running internal SQL, plus a SQLite backend.
// Purpose: Let workers read and write system tables without a host session.
// Dependencies: async-trait, rusqlite, tokio
// ============================================================================

//! ## Overview
//! Workers talk to their system tables through [`SqlExecutor`]. Rows come
//! back as [`SqlRow`] values with typed accessors so decoding errors name
//! the offending column. [`SqliteExecutor`] implements the seam over a
//! single `rusqlite` connection, moving each call onto the blocking pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::params_from_iter;
use rusqlite::types::ToSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::Value;
use rusqlite::types::ValueRef;

use crate::error::WorkerError;
use crate::error::WorkerResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite definitions of the system tables read by the workers.
pub const SQLITE_SYSTEM_TABLES: &str = "
CREATE TABLE IF NOT EXISTS mctech_deny_digest (
    digest TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    expired_at TEXT,
    last_request_time TEXT NULL,
    query_sql TEXT NOT NULL,
    remark TEXT
);
CREATE TABLE IF NOT EXISTS mctech_cross_db (
    id INTEGER PRIMARY KEY,
    invoker_name TEXT NOT NULL,
    invoker_type TEXT NOT NULL CHECK (invoker_type IN ('service', 'package', 'both')),
    allow_all_dbs INTEGER NOT NULL,
    cross_dbs TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    remark TEXT
);
";

// ============================================================================
// SECTION: Values
// ============================================================================

/// A column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Integer or boolean.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text, including datetimes.
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(value) => Self::Int(value),
            ValueRef::Real(value) => Self::Float(value),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Float(value) => ToSqlOutput::Owned(Value::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow(pub Vec<SqlValue>);

impl SqlRow {
    /// Raw value at `column`.
    fn value(&self, column: usize) -> WorkerResult<&SqlValue> {
        self.0.get(column).ok_or_else(|| WorkerError::Decode {
            column,
            reason: "column out of range".to_string(),
        })
    }

    /// Integer value.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Decode`] for missing, null or non-numeric values.
    pub fn int(&self, column: usize) -> WorkerResult<i64> {
        match self.value(column)? {
            SqlValue::Int(value) => Ok(*value),
            SqlValue::Text(text) => text.trim().parse().map_err(|_| WorkerError::Decode {
                column,
                reason: format!("'{text}' is not an integer"),
            }),
            other => Err(WorkerError::Decode {
                column,
                reason: format!("expected integer, found {}", kind(other)),
            }),
        }
    }

    /// Boolean value: non-zero integers, `true` or `1`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Decode`] for missing or null values.
    pub fn boolean(&self, column: usize) -> WorkerResult<bool> {
        match self.value(column)? {
            SqlValue::Int(value) => Ok(*value != 0),
            SqlValue::Text(text) => Ok(text.eq_ignore_ascii_case("true") || text == "1"),
            other => Err(WorkerError::Decode {
                column,
                reason: format!("expected boolean, found {}", kind(other)),
            }),
        }
    }

    /// Text value; `NULL` reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Decode`] when the column is missing.
    pub fn text(&self, column: usize) -> WorkerResult<String> {
        Ok(match self.value(column)? {
            SqlValue::Null => String::new(),
            SqlValue::Int(value) => value.to_string(),
            SqlValue::Float(value) => value.to_string(),
            SqlValue::Text(text) => text.clone(),
        })
    }

    /// Text value that may be `NULL`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Decode`] when the column is missing.
    pub fn optional_text(&self, column: usize) -> WorkerResult<Option<String>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            _ => self.text(column).map(Some),
        }
    }
}

/// Name of a value's type for error messages.
const fn kind(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "null",
        SqlValue::Int(_) => "integer",
        SqlValue::Float(_) => "float",
        SqlValue::Text(_) => "text",
    }
}

// ============================================================================
// SECTION: Executor Seam
// ============================================================================

/// Runs internal SQL on behalf of a worker.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs a query and drains its rows.
    async fn query(&self, sql: &str, args: &[SqlValue]) -> WorkerResult<Vec<SqlRow>>;

    /// Runs a statement, returning the affected row count.
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> WorkerResult<usize>;
}

// ============================================================================
// SECTION: SQLite Executor
// ============================================================================

/// [`SqlExecutor`] over one SQLite connection.
#[derive(Clone)]
pub struct SqliteExecutor {
    /// Shared connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteExecutor {
    /// Opens an in-memory database with the system tables installed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Executor`] when SQLite fails.
    pub fn open_in_memory() -> WorkerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Opens a database file with the system tables installed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Executor`] when SQLite fails.
    pub fn open(path: &Path) -> WorkerResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Wraps a connection, installing the system tables.
    fn from_connection(connection: Connection) -> WorkerResult<Self> {
        connection.execute_batch(SQLITE_SYSTEM_TABLES)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Runs a batch of statements synchronously (fixtures and seeding).
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Executor`] when SQLite fails.
    pub fn execute_batch(&self, sql: &str) -> WorkerResult<()> {
        let guard = lock(&self.connection)?;
        guard.execute_batch(sql)?;
        Ok(())
    }

    /// Runs `task` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, task: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> WorkerResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&connection)?;
            task(&guard)
        })
        .await
        .map_err(|err| WorkerError::Executor(format!("sqlite task failed: {err}")))?
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> WorkerResult<Vec<SqlRow>> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.blocking(move |connection| {
            let mut statement = connection.prepare(&sql)?;
            let count = statement.column_count();
            let mut rows = statement.query(params_from_iter(args.iter()))?;
            let mut drained = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(count);
                for index in 0 .. count {
                    values.push(SqlValue::from(row.get_ref(index)?));
                }
                drained.push(SqlRow(values));
            }
            Ok(drained)
        })
        .await
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> WorkerResult<usize> {
        let sql = sql.to_string();
        let args = args.to_vec();
        self.blocking(move |connection| Ok(connection.execute(&sql, params_from_iter(args.iter()))?))
            .await
    }
}

/// Locks the connection, mapping poisoning to an executor error.
fn lock(connection: &Mutex<Connection>) -> WorkerResult<std::sync::MutexGuard<'_, Connection>> {
    connection.lock().map_err(|_| WorkerError::Executor("sqlite connection mutex poisoned".to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::*;

    #[tokio::test]
    async fn query_round_trips_typed_values() {
        let executor = SqliteExecutor::open_in_memory().unwrap();
        executor
            .execute(
                "INSERT INTO mctech_cross_db VALUES (?1, ?2, 'both', 1, '', 1, '2024-01-01', NULL)",
                &[SqlValue::Int(7), SqlValue::from("svc")],
            )
            .await
            .unwrap();
        let rows = executor
            .query("SELECT id, invoker_name, allow_all_dbs, remark FROM mctech_cross_db", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int(0).unwrap(), 7);
        assert_eq!(rows[0].text(1).unwrap(), "svc");
        assert!(rows[0].boolean(2).unwrap());
        assert_eq!(rows[0].optional_text(3).unwrap(), None);
        assert!(rows[0].int(9).is_err());
    }

    #[test]
    fn text_integers_decode() {
        let row = SqlRow(vec![SqlValue::from(" 42 "), SqlValue::from("x")]);
        assert_eq!(row.int(0).unwrap(), 42);
        assert!(row.int(1).is_err());
    }
}
