//! Queue item types, group classification, and statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Execution mode of a test group.
///
/// Advisory to the runner: parallel groups are safe to replay
/// concurrently, sequential groups are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    /// Tests in the group may run concurrently.
    Parallel,
    /// Tests in the group must run one at a time.
    Sequential,
}

impl GroupType {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GroupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            _ => Err(format!("invalid group type: {s}")),
        }
    }
}

/// A single failed test in the queue.
///
/// `file_path` is the identity key: re-enqueueing the same path updates
/// this row instead of creating a second one.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTest {
    /// Unique identifier, monotonically assigned.
    pub id: i64,
    /// Absolute path of the failing test file.
    pub file_path: String,
    /// Higher priority items are served first (default 0).
    pub priority: i64,
    /// When the path was first enqueued (ISO-8601).
    pub created_at: String,
    /// Total times this path has been enqueued; authoritative retry budget.
    pub failure_count: i64,
    /// When the path was most recently enqueued (ISO-8601).
    pub last_failure: String,
    /// Most recent error context, replaced on every re-enqueue.
    pub error: Option<String>,
    /// Execution group id; NULL when ungrouped.
    pub group_id: Option<i64>,
    /// Group execution mode (stored as text, parsed via `group_type()`).
    #[sqlx(rename = "group_type")]
    #[serde(rename = "groupType")]
    pub group_type_str: Option<String>,
    /// Position within the group.
    pub group_order: i64,
}

impl FailedTest {
    /// Returns the parsed group type, `None` when ungrouped or invalid.
    #[must_use]
    pub fn group_type(&self) -> Option<GroupType> {
        self.group_type_str.as_deref().and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for FailedTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FailedTest {{ id: {}, path: {}, priority: {}, failures: {} }}",
            self.id, self.file_path, self.priority, self.failure_count
        )
    }
}

/// Aggregate queue statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Number of distinct test files queued.
    pub total_items: i64,
    /// Mean failure count across items; 0.0 on an empty queue.
    pub average_failure_count: f64,
    /// Item with the earliest `created_at`, if any.
    pub oldest_test: Option<String>,
    /// Item with the latest `created_at`, if any.
    pub newest_test: Option<String>,
    /// Count of items at each priority level.
    ///
    /// Serializes as a JSON object with numeric string keys.
    pub items_by_priority: BTreeMap<i64, i64>,
}
