//! Execution-group planning over the queue.
//!
//! Grouping assigns each test a `(group_id, group_type, group_order)`
//! triple so whole batches can be replayed together. Ungrouped tests stay
//! dequeuable through the single-item operations but are invisible here.

use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, instrument};

use super::item::{FailedTest, GroupType};
use super::{Queue, Result};

/// One group in a grouping plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedGroup {
    /// Group identity; dequeue serves lower ids first.
    pub group_id: i64,
    /// Execution mode for the group.
    #[serde(rename = "type")]
    pub group_type: GroupType,
    /// Test paths in execution order.
    pub tests: Vec<String>,
    /// Optional overall position, advisory at assignment time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// A full grouping plan, as accepted by `set_execution_groups_advanced`
/// and reconstructed by `grouping_plan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingPlan {
    /// The planned groups.
    pub groups: Vec<PlannedGroup>,
}

/// Outcome of a group assignment.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    /// Rows whose grouping columns were written.
    pub assigned: usize,
    /// Plan paths not present in the queue, skipped as no-ops.
    pub skipped: Vec<String>,
}

/// Counts of distinct groups by type.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    /// Total distinct group ids.
    pub total: i64,
    /// Distinct parallel groups.
    pub parallel: i64,
    /// Distinct sequential groups.
    pub sequential: i64,
}

impl Queue {
    /// Assigns tests to execution groups from an ordered list of lists.
    ///
    /// Group index `i` becomes `group_id = i + 1`; a group is `parallel`
    /// iff it holds more than one test; `group_order` is the position in
    /// the inner list. Paths not present in the queue are skipped and
    /// reported. Prior groupings of unrelated rows are left alone; callers
    /// clear first if they want a clean slate.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the transaction fails.
    #[instrument(skip(self, groups), fields(group_count = groups.len()))]
    pub async fn set_execution_groups(&self, groups: &[Vec<String>]) -> Result<GroupAssignment> {
        let plan = GroupingPlan {
            groups: groups
                .iter()
                .enumerate()
                .map(|(index, tests)| PlannedGroup {
                    group_id: index as i64 + 1,
                    group_type: if tests.len() > 1 {
                        GroupType::Parallel
                    } else {
                        GroupType::Sequential
                    },
                    tests: tests.clone(),
                    order: None,
                })
                .collect(),
        };

        self.set_execution_groups_advanced(&plan).await
    }

    /// Assigns tests to execution groups from an explicit plan.
    ///
    /// Groups carrying an `order` are applied in that order; the value is
    /// advisory and not persisted (reconstruction sorts by `group_id`).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the transaction fails.
    #[instrument(skip(self, plan), fields(group_count = plan.groups.len()))]
    pub async fn set_execution_groups_advanced(
        &self,
        plan: &GroupingPlan,
    ) -> Result<GroupAssignment> {
        let mut ordered: Vec<&PlannedGroup> = plan.groups.iter().collect();
        ordered.sort_by_key(|group| (group.order.unwrap_or(group.group_id), group.group_id));

        let mut assignment = GroupAssignment::default();
        let mut tx = self.db().pool().begin().await?;

        for group in ordered {
            for (position, path) in group.tests.iter().enumerate() {
                let result = sqlx::query(
                    r"UPDATE failed_tests
                      SET group_id = ?, group_type = ?, group_order = ?
                      WHERE file_path = ?",
                )
                .bind(group.group_id)
                .bind(group.group_type.as_str())
                .bind(position as i64)
                .bind(path)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    debug!(path = %path, "Plan path not in queue, skipping");
                    assignment.skipped.push(path.clone());
                } else {
                    assignment.assigned += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(assignment)
    }

    /// Returns the tests of the lowest extant group without removing them.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the query fails.
    #[instrument(skip(self))]
    pub async fn peek_group(&self) -> Result<Option<Vec<FailedTest>>> {
        let items = sqlx::query_as::<_, FailedTest>(
            r"SELECT * FROM failed_tests
              WHERE group_id = (
                  SELECT MIN(group_id) FROM failed_tests WHERE group_id IS NOT NULL
              )
              ORDER BY group_order ASC, created_at ASC, id ASC",
        )
        .fetch_all(self.db().pool())
        .await?;

        Ok(if items.is_empty() { None } else { Some(items) })
    }

    /// Atomically removes the lowest extant group and returns its paths in
    /// group order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the transaction fails.
    #[instrument(skip(self))]
    pub async fn dequeue_group(&self) -> Result<Option<Vec<String>>> {
        let mut tx = self.db().pool().begin().await?;

        let head_group: Option<i64> =
            sqlx::query(r"SELECT MIN(group_id) AS head FROM failed_tests WHERE group_id IS NOT NULL")
                .fetch_one(&mut *tx)
                .await?
                .get("head");

        let Some(group_id) = head_group else {
            tx.rollback().await?;
            return Ok(None);
        };

        let rows = sqlx::query(
            r"SELECT file_path FROM failed_tests
              WHERE group_id = ?
              ORDER BY group_order ASC, created_at ASC, id ASC",
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await?;
        let paths: Vec<String> = rows.iter().map(|row| row.get("file_path")).collect();

        sqlx::query(r"DELETE FROM failed_tests WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(paths))
    }

    /// Clears grouping columns on every row without removing any.
    ///
    /// # Returns
    ///
    /// The number of rows that lost a grouping.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the update fails.
    #[instrument(skip(self))]
    pub async fn clear_groups(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE failed_tests
              SET group_id = NULL, group_type = NULL, group_order = 0
              WHERE group_id IS NOT NULL",
        )
        .execute(self.db().pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Counts distinct groups by type.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the query fails.
    #[instrument(skip(self))]
    pub async fn group_stats(&self) -> Result<GroupStats> {
        let row = sqlx::query(
            r"SELECT
                  COUNT(DISTINCT group_id) AS total,
                  COUNT(DISTINCT CASE WHEN group_type = 'parallel' THEN group_id END) AS parallel,
                  COUNT(DISTINCT CASE WHEN group_type = 'sequential' THEN group_id END) AS sequential
              FROM failed_tests
              WHERE group_id IS NOT NULL",
        )
        .fetch_one(self.db().pool())
        .await?;

        Ok(GroupStats {
            total: row.get("total"),
            parallel: row.get("parallel"),
            sequential: row.get("sequential"),
        })
    }

    /// Reconstructs the current grouping plan, lowest group first.
    ///
    /// Returns `None` when no row is grouped.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`](super::QueueError::Database) if
    /// the query fails.
    #[instrument(skip(self))]
    pub async fn grouping_plan(&self) -> Result<Option<GroupingPlan>> {
        let items = sqlx::query_as::<_, FailedTest>(
            r"SELECT * FROM failed_tests
              WHERE group_id IS NOT NULL
              ORDER BY group_id ASC, group_order ASC, created_at ASC, id ASC",
        )
        .fetch_all(self.db().pool())
        .await?;

        if items.is_empty() {
            return Ok(None);
        }

        let mut groups: Vec<PlannedGroup> = Vec::new();
        for item in items {
            let Some(group_id) = item.group_id else {
                continue;
            };
            let group_type = item.group_type().unwrap_or(GroupType::Sequential);

            match groups.last_mut() {
                Some(last) if last.group_id == group_id => last.tests.push(item.file_path),
                _ => groups.push(PlannedGroup {
                    group_id,
                    group_type,
                    tests: vec![item.file_path],
                    order: None,
                }),
            }
        }

        Ok(Some(GroupingPlan { groups }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    // Transactional behavior is covered in tests/groups_integration.rs;
    // these pin plan (de)serialization shapes.

    use super::*;

    #[test]
    fn test_planned_group_json_shape() {
        let group = PlannedGroup {
            group_id: 1,
            group_type: GroupType::Parallel,
            tests: vec!["/t1".to_string(), "/t2".to_string()],
            order: None,
        };
        let value = serde_json::to_value(&group).unwrap();
        assert_eq!(value["groupId"], 1);
        assert_eq!(value["type"], "parallel");
        assert_eq!(value["tests"][1], "/t2");
        assert!(value.get("order").is_none());
    }

    #[test]
    fn test_grouping_plan_deserializes_with_order() {
        let plan: GroupingPlan = serde_json::from_str(
            r#"{"groups":[{"groupId":3,"type":"sequential","tests":["/t"],"order":1}]}"#,
        )
        .unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].group_id, 3);
        assert_eq!(plan.groups[0].order, Some(1));
        assert_eq!(plan.groups[0].group_type, GroupType::Sequential);
    }

    #[test]
    fn test_group_assignment_default_is_empty() {
        let assignment = GroupAssignment::default();
        assert_eq!(assignment.assigned, 0);
        assert!(assignment.skipped.is_empty());
    }
}
