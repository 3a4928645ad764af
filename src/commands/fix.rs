//! fix-next and fix-all commands.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use super::{AppContext, fail, print_json};
use tfq_core::fixer::MIN_TEST_TIMEOUT_MS;
use tfq_core::{FixerLoop, FixerSettings, TestRunner};

pub(crate) async fn fix_next(
    ctx: &AppContext,
    test_timeout_ms: Option<u64>,
    json: bool,
) -> Result<i32> {
    let fixer = match build_loop(ctx, test_timeout_ms, None) {
        Ok(fixer) => fixer,
        Err(message) => return fail(json, &message),
    };

    match fixer.fix_next().await {
        Ok(outcome) => {
            if json {
                let mut value = serde_json::to_value(&outcome)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert("success".to_string(), json!(true));
                }
                print_json(&value);
            } else if !outcome.test_found {
                println!("Queue is empty");
            } else {
                let path = outcome.file_path.as_deref().unwrap_or("<unknown>");
                if outcome.fixed {
                    println!("Fixed and verified {path}");
                } else if outcome.requeued {
                    println!("Still failing, re-enqueued {path}");
                } else {
                    println!("Retries exhausted, abandoned {path}");
                }
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

pub(crate) async fn fix_all(
    ctx: &AppContext,
    max_iterations: Option<u32>,
    json: bool,
) -> Result<i32> {
    let fixer = match build_loop(ctx, None, max_iterations) {
        Ok(fixer) => fixer,
        Err(message) => return fail(json, &message),
    };

    match fixer.fix_all().await {
        Ok(totals) => {
            if json {
                let mut value = serde_json::to_value(totals)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert("success".to_string(), json!(true));
                }
                print_json(&value);
            } else {
                println!(
                    "{} iteration(s): {} fixed, {} re-enqueued, {} abandoned, {} remaining",
                    totals.iterations,
                    totals.fixed,
                    totals.requeued,
                    totals.abandoned,
                    totals.remaining
                );
            }
            Ok(0)
        }
        Err(err) => fail(json, &err.to_string()),
    }
}

/// Assembles the fixer loop from config plus CLI overrides.
fn build_loop(
    ctx: &AppContext,
    test_timeout_ms: Option<u64>,
    max_iterations: Option<u32>,
) -> Result<FixerLoop, String> {
    let project_dir =
        std::env::current_dir().map_err(|err| format!("cannot resolve working directory: {err}"))?;

    let mut settings: FixerSettings = ctx.config.fixer.clone();
    if let Some(timeout_ms) = test_timeout_ms {
        settings.test_timeout = Duration::from_millis(timeout_ms.max(MIN_TEST_TIMEOUT_MS));
    }
    if let Some(iterations) = max_iterations {
        settings.max_iterations = iterations;
    }

    let runner = TestRunner::new(ctx.registry.clone(), ctx.config.runner_settings());
    Ok(FixerLoop::new(
        ctx.queue.clone(),
        runner,
        settings,
        project_dir,
    ))
}
