//! Grouping commands: set-groups, get-groups, group-stats, clear-groups.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use super::{AppContext, fail, print_json};
use tfq_core::GroupingPlan;

/// `set-groups` accepts either a bare list of lists (`[["/a"],["/b"]]`)
/// or a full plan object with explicit ids/types.
pub(crate) async fn set_groups(
    ctx: &AppContext,
    plan_json: Option<&str>,
    file: Option<&Path>,
) -> Result<i32> {
    let raw = match (plan_json, file) {
        (Some(inline), None) => inline.to_string(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                return fail(
                    false,
                    &format!("failed to read plan file '{}': {err}", path.display()),
                );
            }
        },
        _ => return fail(false, "set-groups requires --json '<plan>' or --file <plan.json>"),
    };

    let assignment = if let Ok(simple) = serde_json::from_str::<Vec<Vec<String>>>(&raw) {
        ctx.queue.set_execution_groups(&simple).await
    } else {
        match serde_json::from_str::<GroupingPlan>(&raw) {
            Ok(plan) => ctx.queue.set_execution_groups_advanced(&plan).await,
            Err(err) => return fail(false, &format!("invalid grouping plan: {err}")),
        }
    };

    match assignment {
        Ok(assignment) => {
            println!(
                "Grouped {} test(s){}",
                assignment.assigned,
                if assignment.skipped.is_empty() {
                    String::new()
                } else {
                    format!(", skipped {} unknown path(s)", assignment.skipped.len())
                }
            );
            for skipped in &assignment.skipped {
                println!("  skipped: {skipped}");
            }
            Ok(0)
        }
        Err(err) => fail(false, &err.to_string()),
    }
}

pub(crate) async fn get_groups(ctx: &AppContext, json: bool) -> Result<i32> {
    match ctx.queue.grouping_plan().await {
        Ok(Some(plan)) => {
            if json {
                print_json(&json!({ "success": true, "groups": plan.groups }));
            } else {
                for group in &plan.groups {
                    println!(
                        "Group {} ({}): {}",
                        group.group_id,
                        group.group_type,
                        group.tests.join(", ")
                    );
                }
            }
            Ok(0)
        }
        Ok(None) => {
            if json {
                print_json(&json!({ "success": true, "groups": [] }));
            } else {
                println!("No groups defined");
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn group_stats(ctx: &AppContext, json: bool) -> Result<i32> {
    match ctx.queue.group_stats().await {
        Ok(stats) => {
            if json {
                print_json(&json!({
                    "success": true,
                    "total": stats.total,
                    "parallel": stats.parallel,
                    "sequential": stats.sequential,
                }));
            } else {
                println!(
                    "{} group(s): {} parallel, {} sequential",
                    stats.total, stats.parallel, stats.sequential
                );
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn clear_groups(ctx: &AppContext) -> Result<i32> {
    match ctx.queue.clear_groups().await {
        Ok(cleared) => {
            println!("Cleared grouping on {cleared} item(s)");
            Ok(0)
        }
        Err(err) => fail(false, &err.to_string()),
    }
}
