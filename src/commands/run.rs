//! run-tests and languages commands.

use anyhow::Result;
use serde_json::json;
use tracing::info;

use super::{AppContext, fail, print_json};
use tfq_core::{
    AdapterRegistry, Framework, Language, RunOptions, RunnerSettings, TestRunner,
};

pub(crate) struct RunTestsOptions {
    pub language: Option<Language>,
    pub framework: Option<Framework>,
    pub auto_detect: bool,
    pub auto_add: bool,
    pub allow_unsupported: bool,
    /// Stream child output while capturing (`--verbose`).
    pub verbose: bool,
    pub command: Vec<String>,
}

pub(crate) async fn run_tests(
    ctx: &AppContext,
    options: RunTestsOptions,
    json: bool,
) -> Result<i32> {
    let project_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => return fail(json, &format!("cannot resolve working directory: {err}")),
    };

    // --auto-detect means "trust the project, not the config defaults"
    let settings = if options.auto_detect {
        RunnerSettings {
            test_commands: ctx.config.test_commands.clone(),
            ..RunnerSettings::default()
        }
    } else {
        ctx.config.runner_settings()
    };
    let runner = TestRunner::new(ctx.registry.clone(), settings);

    let mut run_options = RunOptions::new(project_dir);
    run_options.language = options.language;
    run_options.framework = options.framework;
    run_options.allow_unsupported = options.allow_unsupported;
    // JSON mode owns stdout; never interleave child output with it
    run_options.verbose = options.verbose && !json;
    if !options.command.is_empty() {
        run_options.command_override = Some(options.command.join(" "));
    }

    let result = match runner.run(&run_options).await {
        Ok(result) => result,
        Err(err) => return fail(json, &err.to_string()),
    };

    let auto_add = options.auto_add || ctx.config.auto_add;
    let mut added = 0usize;
    if auto_add {
        for path in &result.failing_tests {
            if let Err(err) = ctx.queue.enqueue(path, 0, None).await {
                return fail(json, &err.to_string());
            }
            added += 1;
        }
        if added > 0 {
            info!(added, db = %ctx.db_path.display(), "Enqueued failing tests");
        }
    }

    if json {
        let mut value = serde_json::to_value(&result)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("success".to_string(), json!(result.success));
            object.insert("autoAdded".to_string(), json!(added));
            // The full transcripts can be huge; the parsed failures are
            // the contract, the streams stay human-facing.
            object.remove("stdout");
            object.remove("stderr");
        }
        print_json(&value);
    } else {
        println!(
            "{} ({} ms): {} failing test file(s)",
            if result.success { "PASSED" } else { "FAILED" },
            result.duration_ms,
            result.total_failures
        );
        for path in &result.failing_tests {
            println!("  {path}");
        }
        if auto_add && added > 0 {
            println!("Added {added} test(s) to the queue");
        }
    }

    Ok(i32::from(!result.success))
}

pub(crate) fn languages(registry: &AdapterRegistry, json: bool) -> Result<i32> {
    let languages = registry.supported_languages();

    if json {
        let payload: Vec<_> = languages
            .iter()
            .map(|language| {
                let frameworks: Vec<&str> = registry
                    .frameworks_for(*language)
                    .map(|frameworks| frameworks.iter().map(Framework::as_str).collect())
                    .unwrap_or_default();
                json!({ "language": language.as_str(), "frameworks": frameworks })
            })
            .collect();
        print_json(&json!({ "success": true, "languages": payload }));
    } else {
        for language in languages {
            let frameworks = registry
                .frameworks_for(language)
                .map(|frameworks| {
                    frameworks
                        .iter()
                        .map(Framework::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            println!("{language}: {frameworks}");
        }
    }
    Ok(0)
}
