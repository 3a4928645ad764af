//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tfq_core::{Framework, Language};

/// Persistent priority queue for failed test files.
///
/// tfq tracks failing tests across processes in a shared SQLite queue,
/// parses failures out of many test runners' output, and drives an
/// external fixer over the queue one test at a time.
#[derive(Parser, Debug)]
#[command(name = "tfq")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Explicit config file path (beats the discovery chain)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Add a failing test file to the queue
    Add {
        /// Test file path (the queue identity key)
        path: String,
        /// Higher priority is dequeued first
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Error context to store with the item
        #[arg(long)]
        error: Option<String>,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Remove and print the queue head (exit 1 when empty)
    Next {
        /// Dequeue the whole head group instead of one item
        #[arg(long)]
        group: bool,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Print the queue head without removing it (exit 1 when empty)
    Peek {
        /// Peek the whole head group instead of one item
        #[arg(long)]
        group: bool,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// List all queued tests, head first
    List {
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Remove a test from the queue by path
    Remove {
        /// Test file path
        path: String,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Remove every queued test
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        confirm: bool,
        /// Alias of --confirm
        #[arg(long)]
        force: bool,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Show queue statistics
    Stats {
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Case-sensitive substring search over queued paths
    Search {
        /// Substring to match
        substring: String,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Print the number of queued tests
    Count,

    /// Check whether a path is queued (exit 1 when absent)
    Contains {
        /// Test file path
        path: String,
    },

    /// Mark a test resolved: remove it without running anything
    Resolve {
        /// Test file path
        path: String,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Assign queued tests to execution groups
    SetGroups {
        /// Inline plan: JSON list of lists, or a full plan object
        #[arg(long = "json", value_name = "PLAN")]
        plan_json: Option<String>,
        /// Read the plan from a JSON file
        #[arg(long, value_name = "FILE", conflicts_with = "plan_json")]
        file: Option<PathBuf>,
    },

    /// Print the current grouping plan
    GetGroups {
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Show counts of parallel/sequential groups
    GroupStats {
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Clear grouping assignments without removing tests
    ClearGroups,

    /// Run the project's tests and report (optionally enqueue) failures
    RunTests {
        /// Language override
        #[arg(long, value_enum)]
        language: Option<Language>,
        /// Framework override
        #[arg(long, value_enum)]
        framework: Option<Framework>,
        /// Detect language/framework from the project directory
        #[arg(long)]
        auto_detect: bool,
        /// Enqueue detected failures
        #[arg(long)]
        auto_add: bool,
        /// Skip the unsupported-framework pre-flight check
        #[arg(long)]
        allow_unsupported: bool,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
        /// Explicit test command (beats config and adapter defaults)
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// List supported languages and frameworks
    Languages {
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Write a starter config file for this project
    Init {
        /// Database path to record in the config
        #[arg(long, value_name = "PATH")]
        db_path: Option<String>,
        /// CI preset: project-local database path
        #[arg(long)]
        ci: bool,
        /// Shared preset: home-directory database path
        #[arg(long)]
        shared: bool,
        /// Monorepo preset: per-workspace databases
        #[arg(long)]
        workspace_mode: bool,
        /// Directory to initialize (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        scope: Option<PathBuf>,
        /// Skip the .gitignore entry for the database directory
        #[arg(long)]
        no_gitignore: bool,
    },

    /// Fix the queue head: invoke the fixer, verify, drop or re-enqueue
    FixNext {
        /// Per-invocation timeout in milliseconds (floor 1000)
        #[arg(long, value_name = "MS")]
        test_timeout: Option<u64>,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },

    /// Run fix-next until the queue empties or bounds are hit
    FixAll {
        /// Upper bound on fix iterations
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,
        /// Emit a JSON result object
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_add_with_priority() {
        let cli = Cli::try_parse_from(["tfq", "add", "/t.rb", "--priority", "5"]).unwrap();
        match cli.command {
            CliCommand::Add { path, priority, .. } => {
                assert_eq!(path, "/t.rb");
                assert_eq!(priority, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_add_negative_priority() {
        let cli = Cli::try_parse_from(["tfq", "add", "/t.rb", "--priority", "-2"]).unwrap();
        match cli.command {
            CliCommand::Add { priority, .. } => assert_eq!(priority, -2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_next_group_json_flags() {
        let cli = Cli::try_parse_from(["tfq", "next", "--group", "--json"]).unwrap();
        match cli.command {
            CliCommand::Next { group, json } => {
                assert!(group);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_set_groups_json_takes_value() {
        let cli = Cli::try_parse_from(["tfq", "set-groups", "--json", r#"[["/a"],["/b"]]"#]).unwrap();
        match cli.command {
            CliCommand::SetGroups { plan_json, file } => {
                assert_eq!(plan_json.as_deref(), Some(r#"[["/a"],["/b"]]"#));
                assert!(file.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_set_groups_json_conflicts_with_file() {
        let result = Cli::try_parse_from([
            "tfq",
            "set-groups",
            "--json",
            "[]",
            "--file",
            "plan.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_run_tests_trailing_command() {
        let cli = Cli::try_parse_from([
            "tfq",
            "run-tests",
            "--language",
            "python",
            "--auto-add",
            "pytest",
            "-x",
        ])
        .unwrap();
        match cli.command {
            CliCommand::RunTests {
                language,
                auto_add,
                command,
                ..
            } => {
                assert_eq!(language, Some(Language::Python));
                assert!(auto_add);
                assert_eq!(command, vec!["pytest", "-x"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tfq", "list", "-v", "-v"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_unknown_subcommand_rejected() {
        let result = Cli::try_parse_from(["tfq", "frobnicate"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::InvalidSubcommand
        );
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Cli::try_parse_from(["tfq", "--help"]);
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }

    #[test]
    fn test_cli_fix_next_timeout() {
        let cli = Cli::try_parse_from(["tfq", "fix-next", "--test-timeout", "5000"]).unwrap();
        match cli.command {
            CliCommand::FixNext { test_timeout, .. } => assert_eq!(test_timeout, Some(5000)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
