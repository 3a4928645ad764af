//! Queue module for persistent failed-test tracking.
//!
//! This module provides the SQLite-backed priority queue shared by every
//! tfq client process. Items are keyed by file path: enqueueing a path
//! twice updates the existing row (bumping its failure count) instead of
//! creating a duplicate.
//!
//! # Overview
//!
//! - [`Queue`] - Main interface for queue operations
//! - [`FailedTest`] - Individual queue entry with metadata
//! - [`GroupType`] - Execution group classification
//! - [`QueueError`] - Operation error types
//!
//! Grouping operations live in the `groups` sibling file as a second
//! `impl Queue` block.
//!
//! # Example
//!
//! ```ignore
//! use tfq_core::{Database, Queue};
//!
//! let db = Database::new(Path::new("tfq.db")).await?;
//! let queue = Queue::new(db);
//!
//! queue.enqueue("/repo/tests/login_test.rb", 5, None).await?;
//! if let Some(path) = queue.dequeue().await? {
//!     // ... replay the test ...
//! }
//! ```

mod error;
mod groups;
mod item;

pub use error::{QueueDbErrorKind, QueueError};
pub use groups::{GroupAssignment, GroupStats, GroupingPlan, PlannedGroup};
pub use item::{FailedTest, GroupType, QueueStats};

use std::collections::BTreeMap;

use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

/// Head-first ordering shared by dequeue, peek, list, and search.
///
/// `id` breaks ties between same-millisecond inserts; it is monotonic with
/// insertion order, so FIFO holds among equal priorities.
const HEAD_ORDER: &str = "priority DESC, created_at ASC, id ASC";

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Persistent queue of failed test files.
///
/// Every mutation runs in a single transaction (or a single atomic
/// statement), so concurrent processes sharing the database file observe
/// the invariants in any interleaving.
#[derive(Debug, Clone)]
pub struct Queue {
    db: Database,
}

impl Queue {
    /// Creates a new queue over the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Adds a test file to the queue, or updates it if already present.
    ///
    /// On conflict the existing row keeps its `created_at` and grouping
    /// columns; `failure_count` is incremented, `last_failure` refreshed,
    /// `priority` raised to the max of old and new, and `error` replaced
    /// (possibly with nothing).
    ///
    /// # Returns
    ///
    /// The row id of the inserted or updated item.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyPath`] for an empty path (before any
    /// store call) or [`QueueError::Database`] if the upsert fails.
    #[instrument(skip(self, error), fields(path = %file_path, priority))]
    pub async fn enqueue(
        &self,
        file_path: &str,
        priority: i64,
        error: Option<&str>,
    ) -> Result<i64> {
        validate_path(file_path)?;

        let result = sqlx::query(
            r"INSERT INTO failed_tests (file_path, priority, error)
              VALUES (?, ?, ?)
              ON CONFLICT(file_path) DO UPDATE SET
                  failure_count = failure_count + 1,
                  last_failure = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                  priority = MAX(failed_tests.priority, excluded.priority),
                  error = excluded.error
              RETURNING id",
        )
        .bind(file_path)
        .bind(priority)
        .bind(error)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Re-inserts a previously dequeued item with an explicit failure count.
    ///
    /// Used by the fixer loop: `dequeue` deletes the row, so a plain
    /// [`enqueue`](Self::enqueue) would restart the failure count at 1 and
    /// lose the retry budget across process restarts.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyPath`] or [`QueueError::Database`].
    #[instrument(skip(self, error), fields(path = %file_path, priority, failure_count))]
    pub async fn requeue(
        &self,
        file_path: &str,
        priority: i64,
        error: Option<&str>,
        failure_count: i64,
    ) -> Result<i64> {
        validate_path(file_path)?;

        let result = sqlx::query(
            r"INSERT INTO failed_tests (file_path, priority, error, failure_count)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(file_path) DO UPDATE SET
                  failure_count = excluded.failure_count,
                  last_failure = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                  priority = MAX(failed_tests.priority, excluded.priority),
                  error = excluded.error
              RETURNING id",
        )
        .bind(file_path)
        .bind(priority)
        .bind(error)
        .bind(failure_count)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Removes and returns the head path, or `None` on an empty queue.
    ///
    /// The read-head-and-delete runs as one statement, so two concurrent
    /// dequeuers can never receive the same path.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn dequeue(&self) -> Result<Option<String>> {
        Ok(self
            .dequeue_with_context()
            .await?
            .map(|item| item.file_path))
    }

    /// Removes and returns the full head record, or `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn dequeue_with_context(&self) -> Result<Option<FailedTest>> {
        let item = sqlx::query_as::<_, FailedTest>(&format!(
            r"DELETE FROM failed_tests
              WHERE id = (
                  SELECT id FROM failed_tests
                  ORDER BY {HEAD_ORDER}
                  LIMIT 1
              )
              RETURNING *"
        ))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(item)
    }

    /// Returns the head path without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn peek(&self) -> Result<Option<String>> {
        Ok(self.peek_with_context().await?.map(|item| item.file_path))
    }

    /// Returns the full head record without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn peek_with_context(&self) -> Result<Option<FailedTest>> {
        let item = sqlx::query_as::<_, FailedTest>(&format!(
            r"SELECT * FROM failed_tests ORDER BY {HEAD_ORDER} LIMIT 1"
        ))
        .fetch_optional(self.db.pool())
        .await?;

        Ok(item)
    }

    /// Returns all items in head-first order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<FailedTest>> {
        let items = sqlx::query_as::<_, FailedTest>(&format!(
            r"SELECT * FROM failed_tests ORDER BY {HEAD_ORDER}"
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(items)
    }

    /// Looks up a single item by path.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(path = %file_path))]
    pub async fn get(&self, file_path: &str) -> Result<Option<FailedTest>> {
        let item =
            sqlx::query_as::<_, FailedTest>(r"SELECT * FROM failed_tests WHERE file_path = ?")
                .bind(file_path)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(item)
    }

    /// Removes an item by path.
    ///
    /// # Returns
    ///
    /// `true` when a row was removed, `false` when the path was absent.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyPath`] or [`QueueError::Database`].
    #[instrument(skip(self), fields(path = %file_path))]
    pub async fn remove(&self, file_path: &str) -> Result<bool> {
        validate_path(file_path)?;

        let result = sqlx::query(r"DELETE FROM failed_tests WHERE file_path = ?")
            .bind(file_path)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes every item. Groups disappear with their rows.
    ///
    /// # Returns
    ///
    /// The number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query(r"DELETE FROM failed_tests")
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Returns the number of queued items.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn size(&self) -> Result<i64> {
        let result = sqlx::query(r"SELECT COUNT(*) AS count FROM failed_tests")
            .fetch_one(self.db.pool())
            .await?;

        Ok(result.get("count"))
    }

    /// Checks whether a path is currently queued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(path = %file_path))]
    pub async fn contains(&self, file_path: &str) -> Result<bool> {
        let result = sqlx::query(r"SELECT COUNT(*) AS count FROM failed_tests WHERE file_path = ?")
            .bind(file_path)
            .fetch_one(self.db.pool())
            .await?;

        Ok(result.get::<i64, _>("count") > 0)
    }

    /// Case-sensitive substring search on file paths, head-first order.
    ///
    /// Plain `LIKE` folds ASCII case in SQLite, so the match uses
    /// `instr` instead.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self), fields(substring = %substring))]
    pub async fn search(&self, substring: &str) -> Result<Vec<FailedTest>> {
        let items = sqlx::query_as::<_, FailedTest>(&format!(
            r"SELECT * FROM failed_tests
              WHERE instr(file_path, ?) > 0
              ORDER BY {HEAD_ORDER}"
        ))
        .bind(substring)
        .fetch_all(self.db.pool())
        .await?;

        Ok(items)
    }

    /// Glob-pattern search on file paths, head-first order.
    ///
    /// `*` stays within one path segment; `**` spans segments.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidGlob`] for an uncompilable pattern or
    /// [`QueueError::Database`] if the snapshot query fails.
    #[instrument(skip(self), fields(pattern = %pattern))]
    pub async fn search_glob(&self, pattern: &str) -> Result<Vec<FailedTest>> {
        let compiled = glob::Pattern::new(pattern).map_err(|err| QueueError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..glob::MatchOptions::new()
        };

        let items = self.list().await?;
        Ok(items
            .into_iter()
            .filter(|item| compiled.matches_with(&item.file_path, options))
            .collect())
    }

    /// Computes aggregate statistics over the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if any query fails.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<QueueStats> {
        let totals = sqlx::query(
            r"SELECT COUNT(*) AS total, COALESCE(AVG(failure_count), 0.0) AS avg_failures
              FROM failed_tests",
        )
        .fetch_one(self.db.pool())
        .await?;

        let oldest = sqlx::query(
            r"SELECT file_path FROM failed_tests ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;

        let newest = sqlx::query(
            r"SELECT file_path FROM failed_tests ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;

        let priority_rows = sqlx::query(
            r"SELECT priority, COUNT(*) AS count FROM failed_tests GROUP BY priority",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut items_by_priority = BTreeMap::new();
        for row in priority_rows {
            items_by_priority.insert(row.get::<i64, _>("priority"), row.get::<i64, _>("count"));
        }

        Ok(QueueStats {
            total_items: totals.get("total"),
            average_failure_count: totals.get("avg_failures"),
            oldest_test: oldest.map(|row| row.get("file_path")),
            newest_test: newest.map(|row| row.get("file_path")),
            items_by_priority,
        })
    }
}

/// Rejects empty paths before any store call.
fn validate_path(file_path: &str) -> Result<()> {
    if file_path.trim().is_empty() {
        return Err(QueueError::EmptyPath);
    }
    Ok(())
}
