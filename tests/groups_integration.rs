//! Integration tests for execution grouping against a real SQLite
//! database.

use tempfile::TempDir;
use tfq_core::{Database, GroupType, GroupingPlan, Queue};
use tfq_core::queue::PlannedGroup;

async fn setup_queue() -> (Queue, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (Queue::new(db), temp_dir)
}

async fn enqueue_all(queue: &Queue, paths: &[&str]) {
    for path in paths {
        queue.enqueue(path, 0, None).await.expect("enqueue failed");
    }
}

// ==================== Assignment ====================

#[tokio::test]
async fn test_set_execution_groups_assigns_ids_types_and_order() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t1", "/t2", "/t3"]).await;

    let assignment = queue
        .set_execution_groups(&[
            vec!["/t1".to_string(), "/t2".to_string()],
            vec!["/t3".to_string()],
        ])
        .await
        .unwrap();
    assert_eq!(assignment.assigned, 3);
    assert!(assignment.skipped.is_empty());

    let t1 = queue.get("/t1").await.unwrap().unwrap();
    assert_eq!(t1.group_id, Some(1));
    assert_eq!(t1.group_type(), Some(GroupType::Parallel));
    assert_eq!(t1.group_order, 0);

    let t2 = queue.get("/t2").await.unwrap().unwrap();
    assert_eq!(t2.group_id, Some(1));
    assert_eq!(t2.group_order, 1);

    // Single-test group is sequential
    let t3 = queue.get("/t3").await.unwrap().unwrap();
    assert_eq!(t3.group_id, Some(2));
    assert_eq!(t3.group_type(), Some(GroupType::Sequential));
}

#[tokio::test]
async fn test_set_execution_groups_skips_unknown_paths() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/known"]).await;

    let assignment = queue
        .set_execution_groups(&[vec!["/known".to_string(), "/ghost".to_string()]])
        .await
        .unwrap();
    assert_eq!(assignment.assigned, 1);
    assert_eq!(assignment.skipped, vec!["/ghost"]);
    // No phantom rows created
    assert_eq!(queue.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_set_execution_groups_leaves_unrelated_groupings() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/old", "/new"]).await;

    queue
        .set_execution_groups(&[vec!["/old".to_string()]])
        .await
        .unwrap();
    queue
        .set_execution_groups(&[vec!["/new".to_string()]])
        .await
        .unwrap();

    // /old keeps its group 1; /new was assigned group 1 as well
    let old = queue.get("/old").await.unwrap().unwrap();
    assert_eq!(old.group_id, Some(1));
    let new = queue.get("/new").await.unwrap().unwrap();
    assert_eq!(new.group_id, Some(1));
}

#[tokio::test]
async fn test_advanced_plan_uses_explicit_ids_and_types() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/a", "/b"]).await;

    let plan = GroupingPlan {
        groups: vec![PlannedGroup {
            group_id: 7,
            group_type: GroupType::Sequential,
            tests: vec!["/a".to_string(), "/b".to_string()],
            order: Some(1),
        }],
    };
    queue.set_execution_groups_advanced(&plan).await.unwrap();

    let a = queue.get("/a").await.unwrap().unwrap();
    assert_eq!(a.group_id, Some(7));
    assert_eq!(a.group_type(), Some(GroupType::Sequential));
}

#[tokio::test]
async fn test_reenqueue_keeps_grouping_columns() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t"]).await;
    queue
        .set_execution_groups(&[vec!["/t".to_string()]])
        .await
        .unwrap();

    queue.enqueue("/t", 3, Some("again")).await.unwrap();

    let item = queue.get("/t").await.unwrap().unwrap();
    assert_eq!(item.group_id, Some(1));
    assert_eq!(item.group_type(), Some(GroupType::Sequential));
    assert_eq!(item.failure_count, 2);
}

// ==================== Group dequeue (scenario: atomic group dequeue) ====================

#[tokio::test]
async fn test_dequeue_group_drains_groups_in_id_order() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t1", "/t2", "/t3"]).await;
    queue
        .set_execution_groups(&[
            vec!["/t1".to_string(), "/t2".to_string()],
            vec!["/t3".to_string()],
        ])
        .await
        .unwrap();

    let first = queue.dequeue_group().await.unwrap().unwrap();
    assert_eq!(first, vec!["/t1", "/t2"]);
    let remaining: Vec<String> = queue
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.file_path)
        .collect();
    assert_eq!(remaining, vec!["/t3"]);

    let second = queue.dequeue_group().await.unwrap().unwrap();
    assert_eq!(second, vec!["/t3"]);

    assert_eq!(queue.dequeue_group().await.unwrap(), None);
}

#[tokio::test]
async fn test_dequeue_group_respects_group_order_not_priority() {
    let (queue, _tmp) = setup_queue().await;
    queue.enqueue("/late", 9, None).await.unwrap();
    queue.enqueue("/early", 0, None).await.unwrap();
    queue
        .set_execution_groups(&[vec!["/early".to_string(), "/late".to_string()]])
        .await
        .unwrap();

    let group = queue.dequeue_group().await.unwrap().unwrap();
    assert_eq!(group, vec!["/early", "/late"]);
}

#[tokio::test]
async fn test_dequeue_group_ignores_ungrouped_rows() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/grouped", "/loose"]).await;
    queue
        .set_execution_groups(&[vec!["/grouped".to_string()]])
        .await
        .unwrap();

    let group = queue.dequeue_group().await.unwrap().unwrap();
    assert_eq!(group, vec!["/grouped"]);
    assert!(queue.contains("/loose").await.unwrap());
    assert_eq!(queue.dequeue_group().await.unwrap(), None);
}

#[tokio::test]
async fn test_peek_group_is_non_destructive() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t1", "/t2"]).await;
    queue
        .set_execution_groups(&[vec!["/t1".to_string(), "/t2".to_string()]])
        .await
        .unwrap();

    let peeked = queue.peek_group().await.unwrap().unwrap();
    assert_eq!(peeked.len(), 2);
    assert_eq!(peeked[0].file_path, "/t1");
    assert_eq!(queue.size().await.unwrap(), 2);
}

#[tokio::test]
async fn test_peek_group_empty_when_nothing_grouped() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/loose"]).await;
    assert!(queue.peek_group().await.unwrap().is_none());
}

// ==================== Clearing and stats ====================

#[tokio::test]
async fn test_clear_groups_keeps_rows() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t1", "/t2"]).await;
    queue
        .set_execution_groups(&[vec!["/t1".to_string(), "/t2".to_string()]])
        .await
        .unwrap();

    let cleared = queue.clear_groups().await.unwrap();
    assert_eq!(cleared, 2);
    assert_eq!(queue.size().await.unwrap(), 2);

    let item = queue.get("/t1").await.unwrap().unwrap();
    assert_eq!(item.group_id, None);
    assert_eq!(item.group_type(), None);
    assert_eq!(item.group_order, 0);
    assert!(queue.peek_group().await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_stats_counts_by_type() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/a", "/b", "/c", "/d"]).await;
    queue
        .set_execution_groups(&[
            vec!["/a".to_string(), "/b".to_string()],
            vec!["/c".to_string()],
            vec!["/d".to_string()],
        ])
        .await
        .unwrap();

    let stats = queue.group_stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.parallel, 1);
    assert_eq!(stats.sequential, 2);
}

#[tokio::test]
async fn test_grouping_plan_roundtrip() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/t1", "/t2", "/t3"]).await;
    queue
        .set_execution_groups(&[
            vec!["/t1".to_string(), "/t2".to_string()],
            vec!["/t3".to_string()],
        ])
        .await
        .unwrap();

    let plan = queue.grouping_plan().await.unwrap().unwrap();
    assert_eq!(plan.groups.len(), 2);
    assert_eq!(plan.groups[0].group_id, 1);
    assert_eq!(plan.groups[0].group_type, GroupType::Parallel);
    assert_eq!(plan.groups[0].tests, vec!["/t1", "/t2"]);
    assert_eq!(plan.groups[1].group_id, 2);
    assert_eq!(plan.groups[1].tests, vec!["/t3"]);
}

#[tokio::test]
async fn test_grouping_plan_none_without_groups() {
    let (queue, _tmp) = setup_queue().await;
    enqueue_all(&queue, &["/loose"]).await;
    assert!(queue.grouping_plan().await.unwrap().is_none());
}
