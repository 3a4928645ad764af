//! Configuration loading: file discovery, shape normalization, and
//! database path resolution.
//!
//! The on-disk config is JSON in one of two accepted shapes: the
//! canonical form with a `database.path` object, or the legacy form with
//! a top-level `databasePath`. Both normalize into [`Config`]; nothing
//! downstream knows which shape was read.
//!
//! Discovery order: explicit `--config` path, `./.tfqrc`, `$HOME/.tfqrc`,
//! `$HOME/.tfq/config.json`. A missing file is not an error; defaults
//! apply.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::fixer::{DEFAULT_PROMPT, FixerSettings, MIN_TEST_TIMEOUT_MS};
use crate::parser::{Framework, Language};
use crate::runner::RunnerSettings;

/// Environment variable overriding every other database path source.
pub const DB_PATH_ENV: &str = "TFQ_DB_PATH";

/// Database file name under the default `~/.tfq/` directory.
pub const DEFAULT_DB_FILE: &str = "tfq.db";

/// Default per-test retry bound for the fixer loop.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The config file is not valid JSON in either accepted shape.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A recognized key carries an unusable value.
    #[error("invalid config value for `{key}`: {value} ({reason})")]
    InvalidValue {
        /// The key.
        key: &'static str,
        /// The offending value.
        value: String,
        /// Why it is invalid.
        reason: String,
    },

    /// An explicit `--config` path does not exist.
    #[error("config file '{path}' not found")]
    NotFound {
        /// The missing path.
        path: String,
    },
}

/// Normalized configuration record.
#[derive(Debug, Clone)]
pub struct Config {
    /// `database.path` (or legacy `databasePath`), unresolved.
    pub database_path: Option<String>,
    /// Default language for the runner driver.
    pub language: Option<Language>,
    /// Default framework for the runner driver.
    pub framework: Option<Framework>,
    /// Auto-enqueue detected failures after `run-tests`.
    pub auto_add: bool,
    /// Default parallelism hint for group planners.
    pub parallel: Option<u32>,
    /// `workspaceDir -> dbPath` for monorepos.
    pub workspaces: HashMap<String, String>,
    /// `"<language>:<framework>" -> shell command` overrides.
    pub test_commands: HashMap<String, String>,
    /// Per-test retry bound for the fixer loop.
    pub max_retries: i64,
    /// Fixer subprocess settings.
    pub fixer: FixerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            language: None,
            framework: None,
            auto_add: false,
            parallel: None,
            workspaces: HashMap::new(),
            test_commands: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            fixer: FixerSettings::default(),
        }
    }
}

/// A loaded config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The normalized config (defaults when no file was found).
    pub config: Config,
    /// The file that was read, if any.
    pub path: Option<PathBuf>,
}

/// Canonical on-disk shape.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCanonical {
    database: Option<RawDatabase>,
    language: Option<String>,
    framework: Option<String>,
    defaults: Option<RawDefaults>,
    workspaces: Option<HashMap<String, String>>,
    test_commands: Option<HashMap<String, String>>,
    max_retries: Option<i64>,
    fixer: Option<RawFixer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDatabase {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefaults {
    auto_add: Option<bool>,
    parallel: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFixer {
    enabled: Option<bool>,
    path: Option<String>,
    test_timeout: Option<u64>,
    max_iterations: Option<u32>,
    prompt: Option<String>,
}

/// Legacy on-disk shape: `databasePath` at the top level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLegacy {
    database_path: String,
    language: Option<String>,
    framework: Option<String>,
    max_retries: Option<i64>,
}

/// Either accepted shape. Legacy first: its required `databasePath`
/// distinguishes it, while the all-optional canonical shape would match
/// anything.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigShape {
    Legacy(RawLegacy),
    Canonical(RawCanonical),
}

impl Config {
    /// Loads config from the explicit path or the discovery chain.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for a missing explicit path, and
    /// read/parse/validation errors for a file that exists but is
    /// unusable. A missing discovered file simply yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::NotFound {
                    path: path.display().to_string(),
                });
            }
            return Ok(LoadedConfig {
                config: load_file(path)?,
                path: Some(path.to_path_buf()),
            });
        }

        for candidate in discovery_candidates() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "Loading config file");
                return Ok(LoadedConfig {
                    config: load_file(&candidate)?,
                    path: Some(candidate),
                });
            }
        }

        Ok(LoadedConfig {
            config: Self::default(),
            path: None,
        })
    }

    /// Resolves the database path for this process.
    ///
    /// Priority: `TFQ_DB_PATH` env, a matching `workspaces` entry for the
    /// current directory, `database.path`, then `~/.tfq/tfq.db`. The
    /// winner gets `~` expanded to the home directory and relative paths
    /// anchored at the current working directory.
    #[must_use]
    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(env_path) = env_var_non_empty(DB_PATH_ENV) {
            return expand_path(&env_path);
        }

        if let Some(workspace_db) = self.workspace_db_for_cwd() {
            return expand_path(&workspace_db);
        }

        if let Some(configured) = &self.database_path {
            return expand_path(configured);
        }

        home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tfq")
            .join(DEFAULT_DB_FILE)
    }

    /// The `workspaces` db path whose directory contains the CWD, if any.
    fn workspace_db_for_cwd(&self) -> Option<String> {
        if self.workspaces.is_empty() {
            return None;
        }
        let cwd = env::current_dir().ok()?;

        // Longest matching workspace wins so nested workspaces behave.
        let mut best: Option<(usize, &String)> = None;
        for (workspace_dir, db_path) in &self.workspaces {
            let resolved = expand_path(workspace_dir);
            if cwd.starts_with(&resolved) {
                let depth = resolved.components().count();
                if best.is_none_or(|(best_depth, _)| depth > best_depth) {
                    best = Some((depth, db_path));
                }
            }
        }
        best.map(|(_, db_path)| db_path.clone())
    }

    /// Runner settings derived from this config.
    #[must_use]
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            default_language: self.language,
            default_framework: self.framework,
            test_commands: self.test_commands.clone(),
        }
    }
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let shape: ConfigShape =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    normalize(shape)
}

fn normalize(shape: ConfigShape) -> Result<Config, ConfigError> {
    match shape {
        ConfigShape::Legacy(legacy) => {
            debug!("Normalizing legacy config shape (top-level databasePath)");
            let max_retries = legacy.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
            Ok(Config {
                database_path: Some(legacy.database_path),
                language: parse_language(legacy.language.as_deref())?,
                framework: parse_framework(legacy.framework.as_deref())?,
                max_retries,
                fixer: FixerSettings {
                    max_retries,
                    ..FixerSettings::default()
                },
                ..Config::default()
            })
        }
        ConfigShape::Canonical(canonical) => {
            let max_retries = canonical.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
            let fixer_raw = canonical.fixer.unwrap_or_default();
            let fixer = FixerSettings {
                enabled: fixer_raw.enabled.unwrap_or(false),
                fixer_path: fixer_raw.path.map(|path| expand_path(&path)),
                test_timeout: Duration::from_millis(
                    fixer_raw
                        .test_timeout
                        .unwrap_or(300_000)
                        .max(MIN_TEST_TIMEOUT_MS),
                ),
                max_iterations: fixer_raw.max_iterations.unwrap_or(50),
                prompt: fixer_raw
                    .prompt
                    .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
                max_retries,
            };
            let defaults = canonical.defaults.unwrap_or_default();

            Ok(Config {
                database_path: canonical.database.and_then(|database| database.path),
                language: parse_language(canonical.language.as_deref())?,
                framework: parse_framework(canonical.framework.as_deref())?,
                auto_add: defaults.auto_add.unwrap_or(false),
                parallel: defaults.parallel,
                workspaces: canonical.workspaces.unwrap_or_default(),
                test_commands: canonical.test_commands.unwrap_or_default(),
                max_retries,
                fixer,
            })
        }
    }
}

fn parse_language(raw: Option<&str>) -> Result<Option<Language>, ConfigError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|reason: String| ConfigError::InvalidValue {
                key: "language",
                value: value.to_string(),
                reason,
            })
    })
    .transpose()
}

fn parse_framework(raw: Option<&str>) -> Result<Option<Framework>, ConfigError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|reason: String| ConfigError::InvalidValue {
                key: "framework",
                value: value.to_string(),
                reason,
            })
    })
    .transpose()
}

/// `--config` aside, the places a config file may live, in order.
fn discovery_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(".tfqrc")];
    if let Some(home) = home_dir() {
        candidates.push(home.join(".tfqrc"));
        candidates.push(home.join(".tfq").join("config.json"));
    }
    candidates
}

/// Expands `~` to the home directory and anchors relative paths at the
/// current working directory.
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    if raw == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
        return PathBuf::from(raw);
    }

    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

fn home_dir() -> Option<PathBuf> {
    env_var_non_empty("HOME")
        .or_else(|| env_var_non_empty("USERPROFILE"))
        .map(PathBuf::from)
}

fn env_var_non_empty(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    if value.is_empty() { None } else { Some(value) }
}
