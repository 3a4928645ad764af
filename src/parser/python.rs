//! Python test-output parsing (pytest, unittest).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::language::{Framework, Language};
use super::{TestAdapter, TestFailure, TestOutput, TestSummary, push_unique};

/// pytest short-summary failure: `FAILED <path>::<nodeid>`.
const PYTEST_FAILED: &str = r"^(?:FAILED|ERROR)\s+([^\s:]+\.py)(?:::\S*)?";
#[allow(clippy::expect_used)]
static PYTEST_FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PYTEST_FAILED).expect("pytest FAILED regex is valid"));

/// pytest section header: `_____ <path or nodeid> _____`.
const PYTEST_SECTION: &str = r"^_{3,}\s+(.+?)\s+_{3,}$";
#[allow(clippy::expect_used)]
static PYTEST_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PYTEST_SECTION).expect("pytest section regex is valid"));

/// pytest assertion location: `<path>:<line>: <error>`.
const PYTEST_LOCATION: &str = r"^([^\s:]+\.py):(\d+):\s*(.*)$";
#[allow(clippy::expect_used)]
static PYTEST_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PYTEST_LOCATION).expect("pytest location regex is valid"));

/// unittest failure header: `FAIL: <name> (<module.path>)`.
const UNITTEST_FAIL: &str = r"^(?:FAIL|ERROR):\s+(\S+)\s+\(([\w.]+)\)";
#[allow(clippy::expect_used)]
static UNITTEST_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(UNITTEST_FAIL).expect("unittest FAIL regex is valid"));

#[allow(clippy::expect_used)]
static COUNT_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+(failed|passed|skipped|errors?)\b").expect("pytest count regex is valid")
});
#[allow(clippy::expect_used)]
static RAN_TESTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Ran\s+(\d+)\s+tests?").expect("unittest ran regex is valid"));
#[allow(clippy::expect_used)]
static RESULT_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(failures|errors|skipped)=(\d+)").expect("unittest result regex is valid")
});

/// Adapter for Python projects.
#[derive(Debug)]
pub struct PythonAdapter;

const FRAMEWORKS: &[Framework] = &[Framework::Pytest, Framework::Unittest];

impl TestAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn supported_frameworks(&self) -> &'static [Framework] {
        FRAMEWORKS
    }

    fn default_framework(&self) -> Framework {
        Framework::Pytest
    }

    fn test_command(&self, framework: Framework, path: Option<&Path>) -> String {
        let base = match framework {
            Framework::Unittest => "python -m unittest",
            _ => "python -m pytest",
        };
        match path {
            Some(path) => format!("{base} {}", path.display()),
            None => base.to_string(),
        }
    }

    fn parse_output(&self, output: &str, framework: Framework) -> TestOutput {
        let result = match framework {
            Framework::Unittest => parse_unittest(output),
            _ => parse_pytest(output),
        };

        if result.failing_tests.is_empty() && result.summary.failed > 0 {
            debug!(
                framework = %framework,
                failed = result.summary.failed,
                "Summary reports failures but no failing paths matched"
            );
        }
        result
    }

    fn failure_patterns(&self, framework: Framework) -> Vec<&'static str> {
        match framework {
            Framework::Unittest => vec![UNITTEST_FAIL],
            _ => vec![PYTEST_FAILED, PYTEST_SECTION],
        }
    }
}

fn parse_pytest(output: &str) -> TestOutput {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();

    for line in output.lines() {
        if let Some(captures) = PYTEST_FAILED_RE.captures(line) {
            push_unique(&mut failing_tests, &captures[1]);
            continue;
        }

        // Section headers name either a bare test or `path::nodeid`;
        // only path-bearing headers contribute a file.
        if let Some(captures) = PYTEST_SECTION_RE.captures(line) {
            let section = captures[1].trim();
            let candidate = section.split("::").next().unwrap_or(section);
            let candidate = candidate.rsplit(' ').next().unwrap_or(candidate);
            if candidate.ends_with(".py") {
                push_unique(&mut failing_tests, candidate);
            }
            continue;
        }

        if let Some(captures) = PYTEST_LOCATION_RE.captures(line) {
            let error = captures[3].trim();
            failures.push(TestFailure {
                file: captures[1].to_string(),
                line: captures[2].parse().ok(),
                error: if error.is_empty() {
                    None
                } else {
                    Some(error.to_string())
                },
            });
        }
    }

    let mut summary = TestSummary::default();
    for captures in COUNT_WORD_RE.captures_iter(output) {
        let count: u32 = captures[1].parse().unwrap_or(0);
        match &captures[2] {
            "failed" => summary.failed = count,
            "passed" => summary.passed = count,
            "skipped" => summary.skipped = count,
            // collection/setup errors count as failures
            _ => summary.failed += count,
        }
    }
    summary.total = summary.passed + summary.failed + summary.skipped;

    finish(failing_tests, failures, summary)
}

fn parse_unittest(output: &str) -> TestOutput {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();

    for line in output.lines() {
        if let Some(captures) = UNITTEST_FAIL_RE.captures(line) {
            let path = module_to_path(&captures[2]);
            push_unique(&mut failing_tests, &path);
            failures.push(TestFailure {
                file: path,
                line: None,
                error: Some(captures[1].to_string()),
            });
        }
    }

    let total = RAN_TESTS_RE
        .captures(output)
        .and_then(|captures| captures[1].parse().ok())
        .unwrap_or(0);
    let mut failed = 0;
    let mut skipped = 0;
    for captures in RESULT_FIELD_RE.captures_iter(output) {
        let count: u32 = captures[2].parse().unwrap_or(0);
        match &captures[1] {
            "skipped" => skipped = count,
            _ => failed += count,
        }
    }
    let summary = TestSummary {
        total,
        passed: total.saturating_sub(failed + skipped),
        failed,
        skipped,
    };

    finish(failing_tests, failures, summary)
}

/// Converts a dotted unittest module reference back to a file path.
///
/// Segments are taken up to the first class-looking one (leading
/// uppercase), so both `tests.test_math.TestMath` and the longer
/// `tests.test_math.TestMath.test_add` form yield `tests/test_math.py`.
fn module_to_path(dotted: &str) -> String {
    let segments: Vec<&str> = dotted
        .split('.')
        .take_while(|segment| {
            !segment
                .chars()
                .next()
                .is_some_and(|first| first.is_uppercase())
        })
        .collect();

    if segments.is_empty() {
        format!("{dotted}.py")
    } else {
        format!("{}.py", segments.join("/"))
    }
}

fn finish(
    failing_tests: Vec<String>,
    failures: Vec<TestFailure>,
    summary: TestSummary,
) -> TestOutput {
    TestOutput {
        passed: failing_tests.is_empty() && summary.failed == 0,
        failing_tests,
        failures,
        summary,
    }
}
