//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent readers alongside a single writer
//! - Idempotent schema setup and legacy column migration
//!
//! # Example
//!
//! ```no_run
//! use tfq_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("tfq.db")).await?;
//! // Use db for queries...
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Pool size cap. SQLite serializes writers through file locks, so a
/// handful of connections covers every client of one store.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a connection waits on a held lock before giving up with
/// SQLITE_BUSY, in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Idempotent DDL for the queue table.
///
/// Timestamps are ISO-8601 text with millisecond precision so that
/// insertion order is preserved by `created_at` ordering; `id` remains the
/// final tie-break for same-millisecond inserts.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS failed_tests (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path     TEXT NOT NULL UNIQUE,
    priority      INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    failure_count INTEGER NOT NULL DEFAULT 1,
    last_failure  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    error         TEXT,
    group_id      INTEGER,
    group_type    TEXT CHECK (group_type IN ('parallel', 'sequential')),
    group_order   INTEGER NOT NULL DEFAULT 0
);
";

const ORDER_INDEX_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_failed_tests_order
    ON failed_tests (priority DESC, created_at ASC);
";

const GROUP_INDEX_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_failed_tests_group
    ON failed_tests (group_id, group_order);
";

/// Columns added after the first released schema. Pre-existing tables are
/// migrated by adding whichever of these are missing.
const MIGRATED_COLUMNS: &[(&str, &str)] = &[
    ("error", "ALTER TABLE failed_tests ADD COLUMN error TEXT"),
    (
        "group_id",
        "ALTER TABLE failed_tests ADD COLUMN group_id INTEGER",
    ),
    (
        "group_type",
        "ALTER TABLE failed_tests ADD COLUMN group_type TEXT",
    ),
    (
        "group_order",
        "ALTER TABLE failed_tests ADD COLUMN group_order INTEGER NOT NULL DEFAULT 0",
    ),
];

/// Database-related errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Parent directory for the database file could not be created.
    #[error("failed to create database directory '{path}': {source}")]
    Io {
        /// Directory that could not be created.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),

    /// Failed to create or migrate the schema.
    #[error("failed to set up schema: {0}")]
    Schema(#[source] sqlx::Error),
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration, and
/// idempotent schema setup. The pool is the single on-disk file handle for
/// the process; clones share it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at the specified path.
    ///
    /// This will:
    /// 1. Create the parent directory if absent
    /// 2. Enable WAL mode and a 5000 ms busy timeout
    /// 3. Create the `failed_tests` table and indexes if missing
    /// 4. Add any columns missing from a pre-existing table
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the parent directory cannot be
    /// created, [`StoreError::Connection`] when the connection fails, or
    /// [`StoreError::Schema`] when DDL fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await
            .map_err(StoreError::Connection)?;

        // Enable WAL mode for concurrent readers
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .map_err(StoreError::Connection)?;

        // Let a second writer wait for the first to commit instead of failing
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await
            .map_err(StoreError::Connection)?;

        setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the connection. WAL
    /// mode is not enabled as it provides no benefit in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] or [`StoreError::Schema`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::Connection)?;

        setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, StoreError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Connection)?;

        Ok(result.0.to_lowercase() == "wal")
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// Call before process exit; the Database must not be used afterwards.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Creates the table and indexes, then adds columns missing from a
/// pre-existing table.
async fn setup_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(StoreError::Schema)?;
    sqlx::query(ORDER_INDEX_SQL)
        .execute(pool)
        .await
        .map_err(StoreError::Schema)?;

    let existing = existing_columns(pool).await?;
    for (column, alter_sql) in MIGRATED_COLUMNS {
        if !existing.iter().any(|name| name == column) {
            debug!(column, "Adding missing column to failed_tests");
            sqlx::query(alter_sql)
                .execute(pool)
                .await
                .map_err(StoreError::Schema)?;
        }
    }

    // The group index references migrated columns; create it last.
    sqlx::query(GROUP_INDEX_SQL)
        .execute(pool)
        .await
        .map_err(StoreError::Schema)?;

    Ok(())
}

async fn existing_columns(pool: &SqlitePool) -> Result<Vec<String>, StoreError> {
    let rows = sqlx::query("PRAGMA table_info(failed_tests)")
        .fetch_all(pool)
        .await
        .map_err(StoreError::Schema)?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_opens() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "in-memory store should open");
    }

    #[tokio::test]
    async fn test_database_schema_creates_failed_tests_table() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query("INSERT INTO failed_tests (file_path) VALUES ('/tmp/a_test.rb')")
            .execute(db.pool())
            .await;

        assert!(
            result.is_ok(),
            "failed_tests table should exist after setup"
        );
    }

    #[tokio::test]
    async fn test_database_schema_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        db.close().await;

        // Re-opening the same file must not fail on existing objects
        let db = Database::new(&db_path).await;
        assert!(db.is_ok(), "Re-opening an existing database should succeed");
    }

    #[tokio::test]
    async fn test_database_creates_parent_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("tfq.db");

        let db = Database::new(&db_path).await;
        assert!(db.is_ok(), "Parent directories should be created");
        assert!(db_path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_database_with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        let is_wal = db.is_wal_enabled().await.unwrap();
        assert!(is_wal, "on-disk stores must run in WAL mode");
    }

    #[tokio::test]
    async fn test_database_group_type_check_constraint() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO failed_tests (file_path, group_id, group_type)
             VALUES ('/tmp/x_test.rb', 1, 'bogus')",
        )
        .execute(db.pool())
        .await;

        assert!(
            result.is_err(),
            "Invalid group_type should be rejected by CHECK constraint"
        );
    }

    #[tokio::test]
    async fn test_database_migrates_legacy_table() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("legacy.db");

        // Simulate a pre-grouping schema without error/group columns
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", db_path.display()))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE failed_tests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                failure_count INTEGER NOT NULL DEFAULT 1,
                last_failure TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO failed_tests (file_path) VALUES ('/tmp/old_test.py')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let db = Database::new(&db_path).await.unwrap();

        // Migrated columns must be usable and existing rows preserved
        let row = sqlx::query(
            "SELECT file_path, error, group_id, group_type, group_order
             FROM failed_tests",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<String, _>("file_path"), "/tmp/old_test.py");
        assert_eq!(row.get::<Option<String>, _>("error"), None);
        assert_eq!(row.get::<Option<i64>, _>("group_id"), None);
        assert_eq!(row.get::<i64, _>("group_order"), 0);
    }

    #[tokio::test]
    async fn test_pool_accessor_executes_queries() {
        let db = Database::new_in_memory().await.unwrap();

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();

        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_close_shuts_down_pool() {
        let db = Database::new_in_memory().await.unwrap();
        db.close().await;
    }
}
