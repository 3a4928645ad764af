//! init command: writes a starter `.tfqrc` for a project.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;

use super::fail;

/// Lines appended to `.gitignore` for project-local databases.
const GITIGNORE_ENTRY: &str = ".tfq/";

pub(crate) struct InitOptions {
    pub db_path: Option<String>,
    pub ci: bool,
    pub shared: bool,
    pub workspace_mode: bool,
    pub scope: Option<PathBuf>,
    pub no_gitignore: bool,
}

pub(crate) fn run(options: InitOptions) -> Result<i32> {
    let scope = match &options.scope {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    if !scope.is_dir() {
        return fail(false, &format!("'{}' is not a directory", scope.display()));
    }

    let config_path = scope.join(".tfqrc");
    if config_path.exists() {
        return fail(
            false,
            &format!("'{}' already exists, refusing to overwrite", config_path.display()),
        );
    }

    // Presets: --ci keeps the database inside the project so each checkout
    // is isolated; --shared points every checkout at the home directory.
    let db_path = options.db_path.clone().unwrap_or_else(|| {
        if options.shared {
            "~/.tfq/tfq.db".to_string()
        } else {
            "./.tfq/tfq.db".to_string()
        }
    });

    let mut config = json!({
        "database": { "path": db_path }
    });
    if options.workspace_mode {
        config["workspaces"] = json!({});
    }

    let rendered = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, format!("{rendered}\n"))?;
    println!("Wrote {}", config_path.display());

    let project_local = db_path.starts_with("./") || (options.ci && options.db_path.is_none());
    if project_local && !options.no_gitignore {
        append_gitignore(&scope)?;
    }

    if options.workspace_mode {
        println!("Add workspace entries under \"workspaces\" to map directories to databases");
    }

    Ok(0)
}

/// Appends the database directory to `.gitignore`, once.
fn append_gitignore(scope: &std::path::Path) -> Result<()> {
    let gitignore = scope.join(".gitignore");
    let existing = fs::read_to_string(&gitignore).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == GITIGNORE_ENTRY) {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(GITIGNORE_ENTRY);
    content.push('\n');
    fs::write(&gitignore, content)?;
    println!("Added {GITIGNORE_ENTRY} to .gitignore");
    Ok(())
}
