//! Fix-next control loop: dequeue, invoke the external fixer, verify by
//! re-running the single test, then drop or re-enqueue.
//!
//! The fixer itself is a subprocess: it receives the rendered prompt as
//! its first argument and a JSON [`FixRequest`] on stdin, edits files on
//! disk, and reports through its exit status. Everything that can go
//! wrong downstream (fixer crash, timeout, failed verification) funnels
//! into the same requeue-or-abandon decision, so the queue is always left
//! in a defined state.
//!
//! Retry budgets live in the queue's `failure_count` column rather than
//! in memory, so an interrupted `fix_all` picks up where it left off
//! after a restart.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::parser::{Framework, Language};
use crate::queue::{FailedTest, Queue, QueueError};
use crate::runner::{RunError, RunOptions, TestRunner, kill_gracefully};

/// Floor for the per-invocation timeout; applied by the config loader and
/// re-applied here against hand-built settings.
pub const MIN_TEST_TIMEOUT_MS: u64 = 1000;

/// Default prompt template; `{filePath}` is substituted.
pub const DEFAULT_PROMPT: &str = "Fix the failing test at {filePath}";

/// Fixer-loop configuration, resolved from the config file.
#[derive(Debug, Clone)]
pub struct FixerSettings {
    /// Whether the fixer integration is active.
    pub enabled: bool,
    /// External fixer executable.
    pub fixer_path: Option<PathBuf>,
    /// Per-invocation timeout for the fixer and the verification run.
    pub test_timeout: Duration,
    /// Upper bound on `fix_all` iterations.
    pub max_iterations: u32,
    /// Prompt template with a `{filePath}` placeholder.
    pub prompt: String,
    /// Upper bound on per-test retries, compared against `failure_count`.
    pub max_retries: i64,
}

impl Default for FixerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            fixer_path: None,
            test_timeout: Duration::from_secs(300),
            max_iterations: 50,
            prompt: DEFAULT_PROMPT.to_string(),
            max_retries: 3,
        }
    }
}

/// What the fixer subprocess receives on stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixRequest {
    /// The failing test file.
    pub file_path: String,
    /// Contents of the test file, when readable.
    pub test_content: Option<String>,
    /// Accumulated error context from previous attempts.
    pub error: Option<String>,
    /// Source files the test likely covers.
    pub related_files: Vec<String>,
    /// Language tag.
    pub language: Language,
    /// Framework tag.
    pub framework: Framework,
}

/// Outcome of a single `fix_next` cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOutcome {
    /// False when the queue was empty.
    pub test_found: bool,
    /// The test that was worked on.
    pub file_path: Option<String>,
    /// Verification passed; the item is gone.
    pub fixed: bool,
    /// Verification failed with retries remaining; re-enqueued.
    pub requeued: bool,
    /// Retry budget exhausted; the item was dropped without re-enqueue.
    pub max_retries_exceeded: bool,
    /// Error context recorded for this attempt.
    pub error: Option<String>,
}

impl FixOutcome {
    fn empty() -> Self {
        Self {
            test_found: false,
            file_path: None,
            fixed: false,
            requeued: false,
            max_retries_exceeded: false,
            error: None,
        }
    }
}

/// Totals for a `fix_all` sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixAllOutcome {
    /// `fix_next` cycles executed.
    pub iterations: u32,
    /// Tests verified fixed.
    pub fixed: u32,
    /// Tests re-enqueued for another attempt.
    pub requeued: u32,
    /// Tests dropped after exhausting retries.
    pub abandoned: u32,
    /// Items still queued when the sweep stopped.
    pub remaining: i64,
}

/// Errors that abort a fix cycle outright.
///
/// A failing fixer subprocess is NOT among them; that is converted into a
/// requeue-or-abandon decision.
#[derive(Debug, Error)]
pub enum FixerError {
    /// `fixer.enabled` is false.
    #[error("fixer integration is disabled\n  Suggestion: set fixer.enabled = true in the config file")]
    Disabled,

    /// No fixer executable configured.
    #[error("no fixer executable configured\n  Suggestion: set fixer.path in the config file")]
    MissingFixerPath,

    /// Queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Verification run could not be started at all.
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Orchestrates dequeue → fix → verify → requeue cycles.
pub struct FixerLoop {
    queue: Queue,
    runner: TestRunner,
    settings: FixerSettings,
    project_dir: PathBuf,
}

impl FixerLoop {
    /// Creates a fixer loop over an open queue and a configured runner.
    #[must_use]
    pub fn new(
        queue: Queue,
        runner: TestRunner,
        settings: FixerSettings,
        project_dir: PathBuf,
    ) -> Self {
        Self {
            queue,
            runner,
            settings,
            project_dir,
        }
    }

    /// Runs one fix cycle against the queue head.
    ///
    /// # Errors
    ///
    /// Returns [`FixerError`] when the fixer is disabled/unconfigured or a
    /// queue/runner operation fails structurally. Fixer subprocess
    /// failures and failed verifications are reported in the outcome, not
    /// as errors.
    #[instrument(skip(self))]
    pub async fn fix_next(&self) -> Result<FixOutcome, FixerError> {
        if !self.settings.enabled {
            return Err(FixerError::Disabled);
        }
        let fixer_path = self
            .settings
            .fixer_path
            .as_deref()
            .ok_or(FixerError::MissingFixerPath)?;

        let Some(item) = self.queue.dequeue_with_context().await? else {
            debug!("Queue is empty, nothing to fix");
            return Ok(FixOutcome::empty());
        };
        info!(path = %item.file_path, failure_count = item.failure_count, "Fixing test");

        let mut verify_options = RunOptions::new(self.project_dir.clone());
        verify_options.single_path = Some(PathBuf::from(&item.file_path));
        verify_options.timeout = Some(self.effective_timeout());
        verify_options.allow_unsupported = true;
        let (language, framework, _) = self.runner.resolve(&verify_options)?;

        let request = self.build_request(&item, language, framework).await;
        let fix_error = match self.invoke_fixer(fixer_path, &request).await {
            Ok(()) => None,
            Err(message) => {
                warn!(path = %item.file_path, error = %message, "Fixer invocation failed");
                Some(message)
            }
        };

        // A failed fixer is handled exactly like a failed verification;
        // only a successful fixer earns the re-run.
        let verify_error = match fix_error {
            Some(message) => Some(message),
            None => match self.runner.run(&verify_options).await {
                Ok(result) if result.success => None,
                Ok(result) => Some(verification_failure_text(&result.stdout, &result.stderr)),
                Err(err) => Some(err.to_string()),
            },
        };

        let Some(new_error) = verify_error else {
            info!(path = %item.file_path, "Test fixed and verified");
            return Ok(FixOutcome {
                test_found: true,
                file_path: Some(item.file_path),
                fixed: true,
                requeued: false,
                max_retries_exceeded: false,
                error: None,
            });
        };

        if item.failure_count < self.settings.max_retries {
            let combined = combine_errors(item.error.as_deref(), &new_error);
            self.queue
                .requeue(
                    &item.file_path,
                    item.priority,
                    Some(&combined),
                    item.failure_count + 1,
                )
                .await?;
            info!(
                path = %item.file_path,
                failure_count = item.failure_count + 1,
                "Verification failed, re-enqueued"
            );
            return Ok(FixOutcome {
                test_found: true,
                file_path: Some(item.file_path),
                fixed: false,
                requeued: true,
                max_retries_exceeded: false,
                error: Some(combined),
            });
        }

        warn!(
            path = %item.file_path,
            failure_count = item.failure_count,
            max_retries = self.settings.max_retries,
            "Retries exhausted, abandoning test"
        );
        Ok(FixOutcome {
            test_found: true,
            file_path: Some(item.file_path),
            fixed: false,
            requeued: false,
            max_retries_exceeded: true,
            error: Some(new_error),
        })
    }

    /// Runs `fix_next` until the queue empties, the iteration bound is
    /// hit, or a full pass makes no progress.
    ///
    /// # Errors
    ///
    /// Same conditions as [`fix_next`](Self::fix_next).
    #[instrument(skip(self))]
    pub async fn fix_all(&self) -> Result<FixAllOutcome, FixerError> {
        let mut totals = FixAllOutcome::default();

        while totals.iterations < self.settings.max_iterations {
            let outcome = self.fix_next().await?;
            if !outcome.test_found {
                break;
            }
            totals.iterations += 1;

            if outcome.fixed {
                totals.fixed += 1;
            } else if outcome.max_retries_exceeded {
                totals.abandoned += 1;
            } else {
                totals.requeued += 1;
            }

            // Stop once every remaining item has spent its retry budget;
            // further cycles could only abandon them one by one.
            let remaining = self.queue.list().await?;
            if !remaining.is_empty()
                && remaining
                    .iter()
                    .all(|item| item.failure_count >= self.settings.max_retries)
            {
                info!(
                    remaining = remaining.len(),
                    "All remaining items have exhausted retries, stopping"
                );
                break;
            }
        }

        totals.remaining = self.queue.size().await?;
        Ok(totals)
    }

    async fn build_request(
        &self,
        item: &FailedTest,
        language: Language,
        framework: Framework,
    ) -> FixRequest {
        let test_content = tokio::fs::read_to_string(&item.file_path).await.ok();
        if test_content.is_none() {
            debug!(path = %item.file_path, "Test file unreadable, sending request without content");
        }

        FixRequest {
            file_path: item.file_path.clone(),
            test_content,
            error: item.error.clone(),
            related_files: related_source_files(Path::new(&item.file_path), language),
            language,
            framework,
        }
    }

    /// Spawns the fixer with the rendered prompt and the request JSON on
    /// stdin. Returns a failure message instead of an error: the caller
    /// folds it into the requeue decision.
    async fn invoke_fixer(&self, fixer_path: &Path, request: &FixRequest) -> Result<(), String> {
        let prompt = self.settings.prompt.replace("{filePath}", &request.file_path);
        let payload =
            serde_json::to_vec(request).map_err(|err| format!("request encoding failed: {err}"))?;

        let mut child = Command::new(fixer_path)
            .arg(&prompt)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| format!("failed to spawn fixer '{}': {err}", fixer_path.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(&payload).await {
                debug!(error = %err, "Fixer closed stdin early");
            }
        }

        let stderr_pipe = child.stderr.take();
        let wait = async {
            let mut stderr = String::new();
            if let Some(mut pipe) = stderr_pipe {
                use tokio::io::AsyncReadExt;
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stderr))
        };

        // Bind first so the timeout future releases the child before the
        // kill path needs it.
        let waited = tokio::time::timeout(self.effective_timeout(), wait).await;
        match waited {
            Ok(Ok((status, _))) if status.success() => Ok(()),
            Ok(Ok((status, stderr))) => {
                Err(format!("fixer exited with {status}: {}", stderr.trim()))
            }
            Ok(Err(err)) => Err(format!("fixer I/O failure: {err}")),
            Err(_) => {
                kill_gracefully(&mut child).await;
                Err(format!(
                    "fixer timed out after {} ms",
                    self.effective_timeout().as_millis()
                ))
            }
        }
    }

    fn effective_timeout(&self) -> Duration {
        self.settings
            .test_timeout
            .max(Duration::from_millis(MIN_TEST_TIMEOUT_MS))
    }
}

/// Builds the accumulated error recorded on requeue.
fn combine_errors(prior: Option<&str>, new_error: &str) -> String {
    match prior {
        Some(prior) => format!("Previous attempt: {prior}; Verification failed: {new_error}"),
        None => format!("Verification failed: {new_error}"),
    }
}

/// Short diagnostic from a failed verification run.
fn verification_failure_text(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return "test still failing".to_string();
    }

    // Keep the tail; runners put the verdict last.
    let tail: String = trimmed
        .chars()
        .rev()
        .take(1000)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    tail
}

/// Source files the failing test likely covers: the test's base name with
/// `.test`/`.spec`/`_test`/`_spec` stripped, across the language's
/// extensions, in the test's own directory and its parent.
fn related_source_files(test_path: &Path, language: Language) -> Vec<String> {
    let Some(stem) = test_path.file_stem().and_then(|stem| stem.to_str()) else {
        return Vec::new();
    };
    let base = strip_test_suffix(stem);

    let mut candidate_dirs = Vec::new();
    if let Some(dir) = test_path.parent() {
        candidate_dirs.push(dir.to_path_buf());
        if let Some(parent) = dir.parent() {
            candidate_dirs.push(parent.to_path_buf());
        }
    }

    let mut related = Vec::new();
    for dir in candidate_dirs {
        for extension in language.extensions() {
            let candidate = dir.join(format!("{base}.{extension}"));
            if candidate.is_file() && candidate != test_path {
                related.push(candidate.display().to_string());
            }
        }
    }
    related
}

/// `login.test` → `login`, `login_spec` → `login`; unsuffixed stems pass
/// through.
fn strip_test_suffix(stem: &str) -> &str {
    for suffix in [".test", ".spec", "_test", "_spec"] {
        if let Some(base) = stem.strip_suffix(suffix) {
            return base;
        }
    }
    stem
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    // End-to-end cycles (real fixer scripts, real queue) live in
    // tests/fixer_integration.rs.

    use super::*;

    #[test]
    fn test_strip_test_suffix_variants() {
        assert_eq!(strip_test_suffix("login.test"), "login");
        assert_eq!(strip_test_suffix("login.spec"), "login");
        assert_eq!(strip_test_suffix("login_test"), "login");
        assert_eq!(strip_test_suffix("login_spec"), "login");
        assert_eq!(strip_test_suffix("login"), "login");
    }

    #[test]
    fn test_combine_errors_accumulates() {
        let combined = combine_errors(Some("assertion failed"), "exit code 1");
        assert_eq!(
            combined,
            "Previous attempt: assertion failed; Verification failed: exit code 1"
        );
    }

    #[test]
    fn test_combine_errors_without_prior() {
        assert_eq!(
            combine_errors(None, "exit code 1"),
            "Verification failed: exit code 1"
        );
    }

    #[test]
    fn test_verification_failure_text_prefers_stderr() {
        assert_eq!(verification_failure_text("out", "err"), "err");
        assert_eq!(verification_failure_text("out", "  "), "out");
        assert_eq!(verification_failure_text("", ""), "test still failing");
    }

    #[test]
    fn test_verification_failure_text_keeps_tail() {
        let long = "x".repeat(2000);
        assert_eq!(verification_failure_text(&long, "").len(), 1000);
    }

    #[test]
    fn test_related_source_files_sibling_and_parent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let test_dir = tmp.path().join("tests");
        std::fs::create_dir(&test_dir).unwrap();
        let test_path = test_dir.join("login_test.py");
        std::fs::write(&test_path, "").unwrap();
        std::fs::write(test_dir.join("login.py"), "").unwrap();
        std::fs::write(tmp.path().join("login.py"), "").unwrap();
        std::fs::write(tmp.path().join("unrelated.py"), "").unwrap();

        let related = related_source_files(&test_path, Language::Python);
        assert_eq!(related.len(), 2);
        assert!(related.iter().all(|path| path.ends_with("login.py")));
    }

    #[test]
    fn test_related_source_files_javascript_extensions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let test_path = tmp.path().join("math.test.ts");
        std::fs::write(&test_path, "").unwrap();
        std::fs::write(tmp.path().join("math.ts"), "").unwrap();

        let related = related_source_files(&test_path, Language::JavaScript);
        assert_eq!(related.len(), 1);
        assert!(related[0].ends_with("math.ts"));
    }

    #[test]
    fn test_fixer_settings_default_prompt_has_placeholder() {
        let settings = FixerSettings::default();
        assert!(settings.prompt.contains("{filePath}"));
        assert!(!settings.enabled);
    }

    #[test]
    fn test_effective_timeout_floor() {
        let queue_settings = FixerSettings {
            test_timeout: Duration::from_millis(10),
            ..FixerSettings::default()
        };
        assert!(queue_settings.test_timeout < Duration::from_millis(MIN_TEST_TIMEOUT_MS));
        // The loop applies the floor when it runs; mirror the math here.
        assert_eq!(
            queue_settings
                .test_timeout
                .max(Duration::from_millis(MIN_TEST_TIMEOUT_MS)),
            Duration::from_millis(MIN_TEST_TIMEOUT_MS)
        );
    }
}
