//! Runner driver: constructs and executes the test command, captures
//! output, and parses failures out of it.
//!
//! Non-zero exit is the common case here, not an error: a failing suite
//! exits 1 and still produces a [`RunResult`]. Only spawn/IO failures and
//! timeouts surface as [`RunError`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::parser::{AdapterRegistry, Framework, Language, RegistryError};

/// Exit code reported when the command could not be spawned.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Grace window between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Defaults and overrides the runner resolves commands against.
#[derive(Debug, Clone, Default)]
pub struct RunnerSettings {
    /// Language assumed when detection is skipped or fails.
    pub default_language: Option<Language>,
    /// Framework assumed when detection is skipped or fails.
    pub default_framework: Option<Framework>,
    /// `"<language>:<framework>" -> shell command` overrides from config.
    pub test_commands: HashMap<String, String>,
}

/// One test-run request.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Project directory the command runs in.
    pub project_dir: PathBuf,
    /// Explicit language; beats config default and detection.
    pub language: Option<Language>,
    /// Explicit framework; beats config default and detection.
    pub framework: Option<Framework>,
    /// Explicit command; beats config `testCommands` and adapter default.
    pub command_override: Option<String>,
    /// Restrict the run to a single test file.
    pub single_path: Option<PathBuf>,
    /// Stream child output to our stdout/stderr while capturing.
    pub verbose: bool,
    /// Kill the child after this long (SIGTERM, then SIGKILL).
    pub timeout: Option<Duration>,
    /// Skip the unsupported-framework pre-flight gate.
    pub allow_unsupported: bool,
}

impl RunOptions {
    /// Options for a quiet full-suite run in `project_dir`.
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            language: None,
            framework: None,
            command_override: None,
            single_path: None,
            verbose: false,
            timeout: None,
            allow_unsupported: false,
        }
    }
}

/// Outcome of one test run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// True when the child exited 0.
    pub success: bool,
    /// Child exit code, absent when killed by signal.
    pub exit_code: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Wall-clock duration of the child in milliseconds.
    pub duration_ms: u64,
    /// Language the run resolved to.
    pub language: Language,
    /// Framework the run resolved to.
    pub framework: Framework,
    /// The shell command that was executed.
    pub command: String,
    /// Failing test files extracted from the output.
    pub failing_tests: Vec<String>,
    /// Number of failing test files.
    pub total_failures: usize,
}

/// Errors that prevent a run from producing a [`RunResult`].
#[derive(Debug, Error)]
pub enum RunError {
    /// Language/framework resolution failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No language given, configured, or detectable.
    #[error(
        "could not detect a language in '{dir}'\n  Suggestion: pass --language or set one in the config file"
    )]
    UnknownLanguage {
        /// Directory that was scanned.
        dir: String,
    },

    /// The command could not be started (not found, permission denied).
    #[error("failed to spawn '{command}' (exit code 127): {message}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Raw OS error text.
        message: String,
    },

    /// The child outlived its timeout and was killed.
    #[error("test run timed out after {elapsed_ms} ms: {command}")]
    Timeout {
        /// How long the child ran before the kill.
        elapsed_ms: u64,
        /// The command that was killed.
        command: String,
    },

    /// Reading the child's output failed.
    #[error("I/O error while running tests: {0}")]
    Io(#[from] std::io::Error),
}

/// Drives test-runner child processes.
pub struct TestRunner {
    registry: Arc<AdapterRegistry>,
    settings: RunnerSettings,
}

impl TestRunner {
    /// Creates a runner over the registry with config-derived settings.
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, settings: RunnerSettings) -> Self {
        Self { registry, settings }
    }

    /// Resolves the command for a run without executing it.
    ///
    /// Resolution order: explicit override, config
    /// `testCommands["<language>:<framework>"]`, adapter default. A single
    /// path is appended in every case.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::UnknownLanguage`] or a registry error.
    pub fn resolve(
        &self,
        options: &RunOptions,
    ) -> Result<(Language, Framework, String), RunError> {
        let language = options
            .language
            .or(self.settings.default_language)
            .or_else(|| self.registry.detect_language(&options.project_dir))
            .ok_or_else(|| RunError::UnknownLanguage {
                dir: options.project_dir.display().to_string(),
            })?;

        if let Some(command) = &options.command_override {
            // An explicit command carries its own framework implicitly;
            // still resolve one for parsing the output.
            let framework = self.resolve_framework(language, options)?;
            return Ok((
                language,
                framework,
                append_path(command, options.single_path.as_deref()),
            ));
        }

        let framework = self.resolve_framework(language, options)?;
        let key = format!("{language}:{framework}");
        if let Some(command) = self.settings.test_commands.get(&key) {
            debug!(key = %key, "Using configured test command");
            return Ok((
                language,
                framework,
                append_path(command, options.single_path.as_deref()),
            ));
        }

        let adapter = self.registry.adapter(language)?;
        Ok((
            language,
            framework,
            adapter.test_command(framework, options.single_path.as_deref()),
        ))
    }

    fn resolve_framework(
        &self,
        language: Language,
        options: &RunOptions,
    ) -> Result<Framework, RunError> {
        if let Some(framework) = options.framework {
            return Ok(framework);
        }
        if let Some(framework) = self.settings.default_framework
            && framework.language() == language
        {
            return Ok(framework);
        }
        if let Some(framework) = self.registry.detect_framework(language, &options.project_dir) {
            return Ok(framework);
        }
        Ok(self.registry.adapter(language)?.default_framework())
    }

    /// Runs the tests and parses failures from the captured output.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for resolution failures, the unsupported
    /// pre-flight gate, spawn failures, and timeouts. A failing suite is
    /// NOT an error.
    #[instrument(skip(self, options), fields(dir = %options.project_dir.display()))]
    pub async fn run(&self, options: &RunOptions) -> Result<RunResult, RunError> {
        if !options.allow_unsupported {
            self.registry.check_unsupported(&options.project_dir)?;
        }

        let (language, framework, command) = self.resolve(options)?;
        info!(command = %command, language = %language, framework = %framework, "Running tests");

        let started = Instant::now();
        let captured = execute_shell(
            &command,
            &options.project_dir,
            options.verbose,
            options.timeout,
        )
        .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let adapter = self.registry.adapter(language)?;
        // Runners split their reporting across the two streams; parse both.
        let combined = format!("{}\n{}", captured.stdout, captured.stderr);
        let parsed = adapter.parse_output(&combined, framework);

        let success = captured.exit_code == Some(0);
        if !success {
            debug!(
                exit_code = ?captured.exit_code,
                failures = parsed.failing_tests.len(),
                "Test run reported failures"
            );
        }

        Ok(RunResult {
            success,
            exit_code: captured.exit_code,
            stdout: captured.stdout,
            stderr: captured.stderr,
            duration_ms,
            language,
            framework,
            command,
            total_failures: parsed.failing_tests.len(),
            failing_tests: parsed.failing_tests,
        })
    }
}

struct CapturedOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Spawns `command` through the platform shell with piped output.
///
/// In verbose mode each captured line is echoed to our own stdout/stderr
/// as it arrives; capture happens either way.
async fn execute_shell(
    command: &str,
    working_dir: &Path,
    verbose: bool,
    timeout: Option<Duration>,
) -> Result<CapturedOutput, RunError> {
    let mut child = shell_command(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| RunError::Spawn {
            command: command.to_string(),
            message: err.to_string(),
        })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let started = Instant::now();

    let wait = async {
        let (stdout, stderr) = tokio::join!(
            read_stream(stdout_pipe, verbose, false),
            read_stream(stderr_pipe, verbose, true),
        );
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout?, stderr?))
    };

    let outcome = match timeout {
        Some(limit) => {
            // Bind first so the timeout future (and its borrow of the
            // child) is dropped before the kill path runs.
            let waited = tokio::time::timeout(limit, wait).await;
            match waited {
                Ok(outcome) => outcome,
                Err(_) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    warn!(command = %command, elapsed_ms, "Test run timed out, killing child");
                    kill_gracefully(&mut child).await;
                    return Err(RunError::Timeout {
                        elapsed_ms,
                        command: command.to_string(),
                    });
                }
            }
        }
        None => wait.await,
    };

    let (status, stdout, stderr) = outcome?;
    Ok(CapturedOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

/// Reads a child stream to completion, optionally echoing lines.
async fn read_stream(
    pipe: Option<impl AsyncRead + Unpin>,
    verbose: bool,
    is_stderr: bool,
) -> Result<String, std::io::Error> {
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut lines = BufReader::new(pipe).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        if verbose {
            if is_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    Ok(captured)
}

/// SIGTERM first so the runner can flush its reporters, SIGKILL after the
/// grace window.
pub(crate) async fn kill_gracefully(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a child we own; worst case the process
        // already exited and the signal goes nowhere.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }

    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill timed-out child");
    }
}

/// Appends a single test path to an override command.
fn append_path(command: &str, path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("{command} {}", path.display()),
        None => command.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner() -> TestRunner {
        TestRunner::new(Arc::new(AdapterRegistry::new()), RunnerSettings::default())
    }

    fn options_in(tmp: &TempDir) -> RunOptions {
        let mut options = RunOptions::new(tmp.path().to_path_buf());
        options.language = Some(Language::JavaScript);
        options.framework = Some(Framework::Jest);
        options
    }

    #[tokio::test]
    async fn test_run_captures_output_and_parses_failures() {
        let tmp = TempDir::new().unwrap();
        let mut options = options_in(&tmp);
        options.command_override =
            Some("printf 'FAIL src/a.test.ts\\nFAIL src/b.test.ts\\n'".to_string());

        let result = runner().run(&options).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.failing_tests, vec!["src/a.test.ts", "src/b.test.ts"]);
        assert_eq!(result.total_failures, 2);
        assert!(result.stdout.contains("FAIL src/a.test.ts"));
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut options = options_in(&tmp);
        options.command_override = Some("exit 3".to_string());

        let result = runner().run(&options).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.failing_tests.is_empty());
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let tmp = TempDir::new().unwrap();
        let mut options = options_in(&tmp);
        options.command_override = Some("echo oops >&2".to_string());

        let result = runner().run(&options).await.unwrap();
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_timeout_kills_child() {
        let tmp = TempDir::new().unwrap();
        let mut options = options_in(&tmp);
        options.command_override = Some("sleep 30".to_string());
        options.timeout = Some(Duration::from_millis(200));

        let err = runner().run(&options).await.unwrap_err();
        match err {
            RunError::Timeout { elapsed_ms, .. } => assert!(elapsed_ms >= 200),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_unknown_language_without_detection() {
        let tmp = TempDir::new().unwrap();
        let options = RunOptions::new(tmp.path().to_path_buf());

        let err = runner().run(&options).await.unwrap_err();
        assert!(matches!(err, RunError::UnknownLanguage { .. }));
    }

    #[tokio::test]
    async fn test_run_unsupported_gate_blocks_django() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("manage.py"), "").unwrap();
        let mut options = options_in(&tmp);
        options.language = Some(Language::Python);
        options.framework = None;
        options.command_override = Some("true".to_string());

        let err = runner().run(&options).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Django"));
        assert!(message.contains("pytest"));
    }

    #[tokio::test]
    async fn test_run_unsupported_gate_bypass() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("manage.py"), "").unwrap();
        let mut options = options_in(&tmp);
        options.command_override = Some("true".to_string());
        options.allow_unsupported = true;

        assert!(runner().run(&options).await.is_ok());
    }

    #[test]
    fn test_resolve_prefers_configured_test_command() {
        let mut settings = RunnerSettings::default();
        settings.test_commands.insert(
            "javascript:jest".to_string(),
            "yarn jest --ci".to_string(),
        );
        let runner = TestRunner::new(Arc::new(AdapterRegistry::new()), settings);

        let tmp = TempDir::new().unwrap();
        let mut options = options_in(&tmp);
        options.single_path = Some(PathBuf::from("src/a.test.ts"));

        let (_, _, command) = runner.resolve(&options).unwrap();
        assert_eq!(command, "yarn jest --ci src/a.test.ts");
    }

    #[test]
    fn test_resolve_falls_back_to_adapter_default() {
        let tmp = TempDir::new().unwrap();
        let options = options_in(&tmp);
        let (language, framework, command) = runner().resolve(&options).unwrap();
        assert_eq!(language, Language::JavaScript);
        assert_eq!(framework, Framework::Jest);
        assert_eq!(command, "npx jest");
    }

    #[test]
    fn test_resolve_detects_language_from_markers() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("pytest.ini"), "[pytest]\n").unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pytest\n").unwrap();

        let options = RunOptions::new(tmp.path().to_path_buf());
        let (language, framework, _) = runner().resolve(&options).unwrap();
        assert_eq!(language, Language::Python);
        assert_eq!(framework, Framework::Pytest);
    }
}
