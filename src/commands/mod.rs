//! Command handlers for the CLI surface.
//!
//! Each handler returns the process exit code. In `--json` mode every
//! command prints exactly one JSON object on stdout with a boolean
//! `success` and either a result payload or an `error` string; failures
//! exit 1 either way.

mod fix;
mod groups;
mod init;
mod queue;
mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::cli::{Cli, CliCommand};
use tfq_core::{AdapterRegistry, Config, Database, Queue};

/// Shared state handed to every queue-backed command.
pub struct AppContext {
    pub queue: Queue,
    pub registry: Arc<AdapterRegistry>,
    pub config: Config,
    pub db_path: PathBuf,
}

/// Loads config, opens the store when the command needs it, and runs the
/// requested command.
///
/// # Errors
///
/// Returns configuration and store-open failures; command-level failures
/// are reported through the exit code (and JSON envelope) instead.
pub async fn dispatch(cli: Cli) -> Result<i32> {
    let loaded = Config::load(cli.config.as_deref())?;
    let config = loaded.config;
    let registry = Arc::new(AdapterRegistry::new());
    let stream_output = cli.verbose > 0;

    // init and languages never touch the store; keep them side-effect
    // free on the filesystem outside their own outputs.
    match cli.command {
        CliCommand::Languages { json } => return run::languages(&registry, json),
        CliCommand::Init {
            db_path,
            ci,
            shared,
            workspace_mode,
            scope,
            no_gitignore,
        } => {
            return init::run(init::InitOptions {
                db_path,
                ci,
                shared,
                workspace_mode,
                scope,
                no_gitignore,
            });
        }
        _ => {}
    }

    let db_path = config.resolve_db_path();
    let db = Database::new(&db_path).await?;
    let ctx = AppContext {
        queue: Queue::new(db),
        registry,
        config,
        db_path,
    };

    match cli.command {
        CliCommand::Add {
            path,
            priority,
            error,
            json,
        } => queue::add(&ctx, &path, priority, error.as_deref(), json).await,
        CliCommand::Next { group, json } => queue::next(&ctx, group, json).await,
        CliCommand::Peek { group, json } => queue::peek(&ctx, group, json).await,
        CliCommand::List { json } => queue::list(&ctx, json).await,
        CliCommand::Remove { path, json } => queue::remove(&ctx, &path, json).await,
        CliCommand::Clear {
            confirm,
            force,
            json,
        } => queue::clear(&ctx, confirm || force, json).await,
        CliCommand::Stats { json } => queue::stats(&ctx, json).await,
        CliCommand::Search { substring, json } => queue::search(&ctx, &substring, json).await,
        CliCommand::Count => queue::count(&ctx).await,
        CliCommand::Contains { path } => queue::contains(&ctx, &path).await,
        CliCommand::Resolve { path, json } => queue::resolve(&ctx, &path, json).await,
        CliCommand::SetGroups { plan_json, file } => {
            groups::set_groups(&ctx, plan_json.as_deref(), file.as_deref()).await
        }
        CliCommand::GetGroups { json } => groups::get_groups(&ctx, json).await,
        CliCommand::GroupStats { json } => groups::group_stats(&ctx, json).await,
        CliCommand::ClearGroups => groups::clear_groups(&ctx).await,
        CliCommand::RunTests {
            language,
            framework,
            auto_detect,
            auto_add,
            allow_unsupported,
            json,
            command,
        } => {
            run::run_tests(
                &ctx,
                run::RunTestsOptions {
                    language,
                    framework,
                    auto_detect,
                    auto_add,
                    allow_unsupported,
                    verbose: stream_output,
                    command,
                },
                json,
            )
            .await
        }
        CliCommand::FixNext { test_timeout, json } => {
            fix::fix_next(&ctx, test_timeout, json).await
        }
        CliCommand::FixAll {
            max_iterations,
            json,
        } => fix::fix_all(&ctx, max_iterations, json).await,
        CliCommand::Languages { .. } | CliCommand::Init { .. } => unreachable!("handled above"),
    }
}

/// Prints one JSON object on stdout.
pub(crate) fn print_json(value: &Value) {
    println!("{value}");
}

/// Reports a command failure: JSON envelope on stdout in `--json` mode,
/// plain diagnostic on stderr otherwise. Always exit code 1.
pub(crate) fn fail(json: bool, message: &str) -> Result<i32> {
    if json {
        print_json(&serde_json::json!({ "success": false, "error": message }));
    } else {
        eprintln!("Error: {message}");
    }
    Ok(1)
}
