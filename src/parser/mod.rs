//! Test-output parsing: per-language adapters and their registry.
//!
//! Each adapter turns raw runner output into a canonical list of failing
//! test file paths plus pass/fail counts. Adapters never fail: output the
//! patterns cannot read yields an empty failure list and a debug log, so a
//! mangled test run can not abort queue ingestion.
//!
//! # Overview
//!
//! - [`TestAdapter`] - Capability set implemented per language
//! - [`AdapterRegistry`] - Fixed adapter table plus project detection
//! - [`TestOutput`] / [`TestFailure`] / [`TestSummary`] - Parse results
//!
//! # Example
//!
//! ```
//! use tfq_core::parser::{AdapterRegistry, Framework, Language};
//!
//! let registry = AdapterRegistry::new();
//! let adapter = registry.adapter(Language::JavaScript).unwrap();
//! let result = adapter.parse_output("FAIL src/a.test.ts\n", Framework::Jest);
//! assert_eq!(result.failing_tests, vec!["src/a.test.ts"]);
//! ```

mod detect;
mod javascript;
mod language;
mod python;
mod ruby;

pub use detect::UnsupportedFramework;
pub use javascript::JavaScriptAdapter;
pub use language::{Framework, Language};
pub use python::PythonAdapter;
pub use ruby::RubyAdapter;

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Pass/fail/skip counts extracted from a run's summary line.
///
/// Values the output does not carry stay 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    /// Total tests reported.
    pub total: u32,
    /// Tests that passed.
    pub passed: u32,
    /// Tests that failed.
    pub failed: u32,
    /// Tests that were skipped.
    pub skipped: u32,
}

/// A single extracted failure location.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFailure {
    /// Failing test file path as reported by the runner.
    pub file: String,
    /// Line number, when the output carries one.
    pub line: Option<u32>,
    /// Error text attached to the failure, when present.
    pub error: Option<String>,
}

/// Canonical parse result for one runner invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutput {
    /// True when no failures were extracted and none were counted.
    pub passed: bool,
    /// Failing test file paths, deduplicated in first-seen order.
    pub failing_tests: Vec<String>,
    /// Failure details with locations where available.
    pub failures: Vec<TestFailure>,
    /// Counts from the run summary.
    pub summary: TestSummary,
}

impl TestOutput {
    /// An all-passed result with the given summary.
    #[must_use]
    pub fn passed(summary: TestSummary) -> Self {
        Self {
            passed: true,
            failing_tests: Vec::new(),
            failures: Vec::new(),
            summary,
        }
    }
}

/// Appends `path` unless it is already present, preserving first-seen order.
pub(crate) fn push_unique(paths: &mut Vec<String>, path: &str) {
    if !paths.iter().any(|existing| existing == path) {
        paths.push(path.to_string());
    }
}

/// Per-language capability set: framework detection, command
/// construction, and output parsing.
pub trait TestAdapter: Send + Sync + std::fmt::Debug {
    /// The language this adapter covers.
    fn language(&self) -> Language;

    /// Supported frameworks in preference order; the first is the default.
    fn supported_frameworks(&self) -> &'static [Framework];

    /// The framework assumed when detection finds nothing.
    fn default_framework(&self) -> Framework;

    /// Confidence-weighted framework detection for a project directory.
    fn detect_framework(&self, project_dir: &Path) -> Option<Framework> {
        detect::detect_framework(self.language(), project_dir)
    }

    /// Shell command running the whole suite, or a single file when
    /// `path` is given.
    fn test_command(&self, framework: Framework, path: Option<&Path>) -> String;

    /// Extracts failing test paths, failure locations, and summary counts.
    ///
    /// Never fails: unreadable output produces an empty failure list.
    fn parse_output(&self, output: &str, framework: Framework) -> TestOutput;

    /// The regular expressions the parser matches failure lines with,
    /// exposed for introspection and testing.
    fn failure_patterns(&self, framework: Framework) -> Vec<&'static str>;
}

/// Errors produced by registry lookups and the pre-flight gate.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The language is detectable but has no bundled adapter.
    #[error(
        "no test-output parser for language '{language}'\n  Supported: {supported}\n  Suggestion: configure a custom command via testCommands"
    )]
    UnsupportedLanguage {
        /// The language without an adapter.
        language: Language,
        /// Comma-separated supported language tags.
        supported: String,
    },

    /// The project is configured for frameworks tfq cannot parse.
    #[error("{}", format_unsupported(.detected))]
    UnsupportedFrameworks {
        /// Every unsupported framework found, with migration suggestions.
        detected: Vec<UnsupportedFramework>,
    },
}

fn format_unsupported(detected: &[UnsupportedFramework]) -> String {
    let mut message = String::from("unsupported test framework(s) detected:");
    for framework in detected {
        message.push_str(&format!(
            "\n  - {}: {} (suggestion: migrate to {})",
            framework.name, framework.evidence, framework.suggestion
        ));
    }
    message.push_str("\n  Pass --allow-unsupported to bypass this check");
    message
}

/// Registry of per-language adapters with a fixed preference order.
///
/// Constructed once by the CLI entry point and passed down; there is no
/// process-wide singleton.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn TestAdapter>>,
}

impl AdapterRegistry {
    /// Builds the registry with every bundled adapter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(JavaScriptAdapter),
                Box::new(PythonAdapter),
                Box::new(RubyAdapter),
            ],
        }
    }

    /// Looks up the adapter for a language.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedLanguage`] when no adapter
    /// covers the language (Go and Java are detectable but unbundled).
    pub fn adapter(&self, language: Language) -> Result<&dyn TestAdapter, RegistryError> {
        self.adapters
            .iter()
            .find(|adapter| adapter.language() == language)
            .map(AsRef::as_ref)
            .ok_or_else(|| RegistryError::UnsupportedLanguage {
                language,
                supported: self
                    .supported_languages()
                    .iter()
                    .map(Language::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Languages that have a bundled adapter.
    #[must_use]
    pub fn supported_languages(&self) -> Vec<Language> {
        self.adapters.iter().map(|adapter| adapter.language()).collect()
    }

    /// Frameworks supported for a language, preference order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedLanguage`] when the language
    /// has no adapter.
    pub fn frameworks_for(
        &self,
        language: Language,
    ) -> Result<&'static [Framework], RegistryError> {
        Ok(self.adapter(language)?.supported_frameworks())
    }

    /// Identifies the language of a project directory.
    ///
    /// Marker files are checked in a fixed priority order
    /// (Ruby → Python → JavaScript → Go → Java); when none match, the
    /// largest source-file extension count wins.
    #[must_use]
    pub fn detect_language(&self, project_dir: &Path) -> Option<Language> {
        detect::detect_language(project_dir)
    }

    /// Identifies the framework of a project, confidence-weighted.
    #[must_use]
    pub fn detect_framework(&self, language: Language, project_dir: &Path) -> Option<Framework> {
        detect::detect_framework(language, project_dir)
    }

    /// Pre-flight scan for frameworks tfq cannot parse (Django, nose2,
    /// RSpec, Cucumber, Test::Unit).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedFrameworks`] naming each one
    /// found along with a migration suggestion.
    pub fn check_unsupported(&self, project_dir: &Path) -> Result<(), RegistryError> {
        let detected = detect::scan_unsupported(project_dir);
        if detected.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::UnsupportedFrameworks { detected })
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_adapter_per_supported_language() {
        let registry = AdapterRegistry::new();
        for language in [Language::JavaScript, Language::Python, Language::Ruby] {
            assert!(registry.adapter(language).is_ok(), "missing {language}");
        }
    }

    #[test]
    fn test_registry_go_and_java_are_unsupported() {
        let registry = AdapterRegistry::new();
        for language in [Language::Go, Language::Java] {
            let err = registry.adapter(language).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(language.as_str()));
            assert!(msg.contains("javascript"));
            assert!(msg.contains("testCommands"));
        }
    }

    #[test]
    fn test_registry_frameworks_for_preference_order() {
        let registry = AdapterRegistry::new();
        let frameworks = registry.frameworks_for(Language::JavaScript).unwrap();
        assert_eq!(frameworks[0], Framework::Jest);
        assert!(frameworks.contains(&Framework::Vitest));
    }

    #[test]
    fn test_push_unique_preserves_first_seen_order() {
        let mut paths = Vec::new();
        push_unique(&mut paths, "/a");
        push_unique(&mut paths, "/b");
        push_unique(&mut paths, "/a");
        assert_eq!(paths, vec!["/a", "/b"]);
    }

    #[test]
    fn test_test_output_passed_constructor() {
        let output = TestOutput::passed(TestSummary {
            total: 3,
            passed: 3,
            failed: 0,
            skipped: 0,
        });
        assert!(output.passed);
        assert!(output.failing_tests.is_empty());
        assert_eq!(output.summary.passed, 3);
    }
}
