//! Single-item queue commands: add, next, peek, list, remove, clear,
//! stats, search, count, contains, resolve.

use anyhow::Result;
use serde_json::json;

use super::{AppContext, fail, print_json};
use tfq_core::FailedTest;

pub(crate) async fn add(
    ctx: &AppContext,
    path: &str,
    priority: i64,
    error: Option<&str>,
    json: bool,
) -> Result<i32> {
    match ctx.queue.enqueue(path, priority, error).await {
        Ok(id) => {
            if json {
                print_json(&json!({
                    "success": true,
                    "id": id,
                    "filePath": path,
                    "priority": priority,
                }));
            } else {
                println!("Added {path} (priority {priority})");
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn next(ctx: &AppContext, group: bool, json: bool) -> Result<i32> {
    if group {
        return match ctx.queue.dequeue_group().await {
            Ok(Some(paths)) => {
                if json {
                    print_json(&json!({ "success": true, "tests": paths }));
                } else {
                    for path in paths {
                        println!("{path}");
                    }
                }
                Ok(0)
            }
            Ok(None) => empty_queue(json),
            Err(err) => fail(json, &err.to_string()),
        };
    }

    match ctx.queue.dequeue().await {
        Ok(Some(path)) => {
            if json {
                print_json(&json!({ "success": true, "filePath": path }));
            } else {
                println!("{path}");
            }
            Ok(0)
        }
        Ok(None) => empty_queue(json),
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn peek(ctx: &AppContext, group: bool, json: bool) -> Result<i32> {
    if group {
        return match ctx.queue.peek_group().await {
            Ok(Some(items)) => {
                if json {
                    print_json(&json!({ "success": true, "tests": items }));
                } else {
                    for item in items {
                        println!("{}", item.file_path);
                    }
                }
                Ok(0)
            }
            Ok(None) => empty_queue(json),
            Err(err) => fail(json, &err.to_string()),
        };
    }

    match ctx.queue.peek().await {
        Ok(Some(path)) => {
            if json {
                print_json(&json!({ "success": true, "filePath": path }));
            } else {
                println!("{path}");
            }
            Ok(0)
        }
        Ok(None) => empty_queue(json),
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn list(ctx: &AppContext, json: bool) -> Result<i32> {
    match ctx.queue.list().await {
        Ok(items) => {
            if json {
                print_json(&json!({ "success": true, "tests": items }));
            } else if items.is_empty() {
                println!("Queue is empty");
            } else {
                for item in &items {
                    println!("{}", render_item(item));
                }
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn remove(ctx: &AppContext, path: &str, json: bool) -> Result<i32> {
    match ctx.queue.remove(path).await {
        Ok(removed) => {
            if json {
                print_json(&json!({ "success": true, "removed": removed, "filePath": path }));
            } else if removed {
                println!("Removed {path}");
            } else {
                println!("{path} was not in the queue");
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn clear(ctx: &AppContext, confirmed: bool, json: bool) -> Result<i32> {
    if !confirmed {
        return fail(
            json,
            "refusing to clear the queue without --confirm (or --force)",
        );
    }

    match ctx.queue.clear().await {
        Ok(removed) => {
            if json {
                print_json(&json!({ "success": true, "removed": removed }));
            } else {
                println!("Cleared {removed} item(s)");
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn stats(ctx: &AppContext, json: bool) -> Result<i32> {
    match ctx.queue.stats().await {
        Ok(stats) => {
            if json {
                let mut value = serde_json::to_value(&stats)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert("success".to_string(), json!(true));
                }
                print_json(&value);
            } else {
                println!("Total items: {}", stats.total_items);
                println!("Average failure count: {:.2}", stats.average_failure_count);
                if let Some(oldest) = &stats.oldest_test {
                    println!("Oldest: {oldest}");
                }
                if let Some(newest) = &stats.newest_test {
                    println!("Newest: {newest}");
                }
                for (priority, count) in &stats.items_by_priority {
                    println!("Priority {priority}: {count}");
                }
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn search(ctx: &AppContext, substring: &str, json: bool) -> Result<i32> {
    match ctx.queue.search(substring).await {
        Ok(items) => {
            if json {
                print_json(&json!({ "success": true, "tests": items }));
            } else if items.is_empty() {
                println!("No matches");
            } else {
                for item in &items {
                    println!("{}", render_item(item));
                }
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn count(ctx: &AppContext) -> Result<i32> {
    match ctx.queue.size().await {
        Ok(size) => {
            println!("{size}");
            Ok(0)
        }
        Err(err) => fail(false, &err.to_string()),
    }
}

pub(crate) async fn contains(ctx: &AppContext, path: &str) -> Result<i32> {
    match ctx.queue.contains(path).await {
        Ok(present) => {
            println!("{present}");
            Ok(if present { 0 } else { 1 })
        }
        Err(err) => fail(false, &err.to_string()),
    }
}

pub(crate) async fn resolve(ctx: &AppContext, path: &str, json: bool) -> Result<i32> {
    match ctx.queue.remove(path).await {
        Ok(true) => {
            if json {
                print_json(&json!({ "success": true, "resolved": path }));
            } else {
                println!("Resolved {path}");
            }
            Ok(0)
        }
        Ok(false) => fail(json, &format!("{path} is not in the queue")),
        Err(err) => fail(json, &err.to_string()),
    }
}

/// Empty queue on next/peek: exit 1 per the CLI contract.
fn empty_queue(json: bool) -> Result<i32> {
    if json {
        print_json(&json!({ "success": false, "error": "queue is empty" }));
    } else {
        eprintln!("Queue is empty");
    }
    Ok(1)
}

fn render_item(item: &FailedTest) -> String {
    let mut line = format!(
        "{}  priority={} failures={}",
        item.file_path, item.priority, item.failure_count
    );
    if let Some(group_id) = item.group_id {
        line.push_str(&format!(" group={group_id}"));
    }
    line
}
