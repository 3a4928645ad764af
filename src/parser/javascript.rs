//! JavaScript/TypeScript test-output parsing (jest, vitest, mocha,
//! jasmine, ava).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::language::{Framework, Language};
use super::{TestAdapter, TestFailure, TestOutput, TestSummary, push_unique};

/// Jest/Vitest per-file failure marker: `FAIL <path>`, path ending at the
/// first whitespace.
const FAIL_LINE: &str = r"^\s*FAIL\s+(\S+)";
#[allow(clippy::expect_used)]
static FAIL_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FAIL_LINE).expect("jest FAIL regex is valid"));

/// Vitest cross-marker failure: U+2717 (or U+00D7) followed by a path.
const CROSS_LINE: &str = r"^\s*[✗×]\s+(\S+)";
#[allow(clippy::expect_used)]
static CROSS_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CROSS_LINE).expect("vitest cross regex is valid"));

/// Mocha/Jasmine numbered failure header: `1) <description>`.
const NUMBERED_FAILURE: &str = r"^\s*\d+\)\s+(.*)$";
#[allow(clippy::expect_used)]
static NUMBERED_FAILURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NUMBERED_FAILURE).expect("numbered-failure regex is valid"));

/// Source location inside a stack frame: `at <path>:<line>` or
/// `(<path>:<line>:<col>)`, restricted to JS-family extensions.
const STACK_LOCATION: &str = r"(?:\(|at\s+)([^\s():]+\.(?:js|jsx|ts|tsx|mjs|cjs)):(\d+)";
#[allow(clippy::expect_used)]
static STACK_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STACK_LOCATION).expect("stack-location regex is valid"));

/// AVA failure marker: `✘ [fail]: <title>` or `✘ <path> › <title>`.
const AVA_FAIL: &str = r"^\s*[✘✗×]\s+(?:\[fail\]:\s+)?(.+)$";
#[allow(clippy::expect_used)]
static AVA_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(AVA_FAIL).expect("ava fail regex is valid"));

#[allow(clippy::expect_used)]
static COUNT_FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+fail(?:ed|ing)").expect("failed-count regex is valid"));
#[allow(clippy::expect_used)]
static COUNT_PASSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+pass(?:ed|ing)").expect("passed-count regex is valid")
});
#[allow(clippy::expect_used)]
static COUNT_SKIPPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+(?:skipped|pending)").expect("skipped-count regex is valid")
});
#[allow(clippy::expect_used)]
static COUNT_TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+total").expect("total-count regex is valid"));
#[allow(clippy::expect_used)]
static COUNT_SPECS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+specs?,\s+(\d+)\s+failures?").expect("jasmine specs regex is valid")
});
#[allow(clippy::expect_used)]
static COUNT_AVA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+tests?\s+(failed|passed|skipped)").expect("ava count regex is valid")
});

/// Adapter for JavaScript and TypeScript projects.
#[derive(Debug)]
pub struct JavaScriptAdapter;

const FRAMEWORKS: &[Framework] = &[
    Framework::Jest,
    Framework::Vitest,
    Framework::Mocha,
    Framework::Jasmine,
    Framework::Ava,
];

impl TestAdapter for JavaScriptAdapter {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn supported_frameworks(&self) -> &'static [Framework] {
        FRAMEWORKS
    }

    fn default_framework(&self) -> Framework {
        Framework::Jest
    }

    fn test_command(&self, framework: Framework, path: Option<&Path>) -> String {
        let base = match framework {
            Framework::Jest => "npx jest",
            Framework::Vitest => "npx vitest run",
            Framework::Mocha => "npx mocha",
            Framework::Jasmine => "npx jasmine",
            Framework::Ava => "npx ava",
            // Cross-language frameworks never reach a JS adapter via the
            // registry; fall back to the default command.
            _ => "npx jest",
        };
        match path {
            Some(path) => format!("{base} {}", path.display()),
            None => base.to_string(),
        }
    }

    fn parse_output(&self, output: &str, framework: Framework) -> TestOutput {
        let result = match framework {
            Framework::Vitest => parse_vitest(output),
            Framework::Mocha => parse_mocha(output),
            Framework::Jasmine => parse_jasmine(output),
            Framework::Ava => parse_ava(output),
            _ => parse_jest(output),
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
            Framework::Vitest => vec![FAIL_LINE, CROSS_LINE],
            Framework::Mocha | Framework::Jasmine => vec![NUMBERED_FAILURE, STACK_LOCATION],
            Framework::Ava => vec![AVA_FAIL, STACK_LOCATION],
            _ => vec![FAIL_LINE],
        }
    }
}

fn parse_jest(output: &str) -> TestOutput {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();

    for line in output.lines() {
        if let Some(captures) = FAIL_LINE_RE.captures(line) {
            let path = &captures[1];
            push_unique(&mut failing_tests, path);
            failures.push(TestFailure {
                file: path.to_string(),
                line: None,
                error: None,
            });
        }
    }

    let summary = jest_summary(output);
    finish(failing_tests, failures, summary)
}

fn parse_vitest(output: &str) -> TestOutput {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();

    for line in output.lines() {
        let captured = FAIL_LINE_RE
            .captures(line)
            .or_else(|| CROSS_LINE_RE.captures(line));
        if let Some(captures) = captured {
            let token = &captures[1];
            // Cross markers also prefix test titles; only path-like
            // tokens name files.
            if looks_like_js_path(token) {
                push_unique(&mut failing_tests, token);
                failures.push(TestFailure {
                    file: token.to_string(),
                    line: None,
                    error: None,
                });
            }
        }
    }

    let summary = jest_summary(output);
    finish(failing_tests, failures, summary)
}

fn parse_mocha(output: &str) -> TestOutput {
    let (failing_tests, failures) = numbered_block_failures(output);

    let passed = first_count(&COUNT_PASSED_RE, output);
    let failed = first_count(&COUNT_FAILED_RE, output);
    let skipped = first_count(&COUNT_SKIPPED_RE, output);
    let summary = TestSummary {
        total: passed + failed + skipped,
        passed,
        failed,
        skipped,
    };

    finish(failing_tests, failures, summary)
}

fn parse_jasmine(output: &str) -> TestOutput {
    let (failing_tests, failures) = numbered_block_failures(output);

    let summary = COUNT_SPECS_RE
        .captures(output)
        .map(|captures| {
            let total = parse_u32(&captures[1]);
            let failed = parse_u32(&captures[2]);
            let skipped = first_count(&COUNT_SKIPPED_RE, output);
            TestSummary {
                total,
                passed: total.saturating_sub(failed + skipped),
                failed,
                skipped,
            }
        })
        .unwrap_or_default();

    finish(failing_tests, failures, summary)
}

fn parse_ava(output: &str) -> TestOutput {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(captures) = AVA_FAIL_RE.captures(line) else {
            continue;
        };
        let rest = captures[1].trim();

        // `✘ path › title` carries the file inline; `✘ [fail]: title`
        // needs the next stack location instead.
        let inline = rest
            .split('›')
            .next()
            .map(str::trim)
            .filter(|token| looks_like_js_path(token));

        if let Some(path) = inline {
            push_unique(&mut failing_tests, path);
            failures.push(TestFailure {
                file: path.to_string(),
                line: None,
                error: Some(rest.to_string()),
            });
            continue;
        }

        while let Some(next) = lines.peek() {
            if AVA_FAIL_RE.is_match(next) {
                break;
            }
            if let Some(location) = STACK_LOCATION_RE.captures(next) {
                let path = location[1].to_string();
                push_unique(&mut failing_tests, &path);
                failures.push(TestFailure {
                    file: path,
                    line: location[2].parse().ok(),
                    error: Some(rest.to_string()),
                });
                break;
            }
            lines.next();
        }
    }

    let mut summary = TestSummary::default();
    for captures in COUNT_AVA_RE.captures_iter(output) {
        let count = parse_u32(&captures[1]);
        match &captures[2] {
            "failed" => summary.failed = count,
            "passed" => summary.passed = count,
            _ => summary.skipped = count,
        }
    }
    summary.total = summary.passed + summary.failed + summary.skipped;

    finish(failing_tests, failures, summary)
}

/// Shared mocha/jasmine extraction: a numbered failure header followed by
/// stack lines carrying `<path>:<line>`.
fn numbered_block_failures(output: &str) -> (Vec<String>, Vec<TestFailure>) {
    let mut failing_tests = Vec::new();
    let mut failures = Vec::new();
    let mut current_error: Option<String> = None;

    for line in output.lines() {
        if let Some(captures) = NUMBERED_FAILURE_RE.captures(line) {
            current_error = Some(captures[1].trim().to_string());
            continue;
        }

        if let Some(error) = &current_error
            && let Some(location) = STACK_LOCATION_RE.captures(line)
        {
            let path = &location[1];
            if path.contains("node_modules") || path.starts_with("node:") {
                continue;
            }
            push_unique(&mut failing_tests, path);
            failures.push(TestFailure {
                file: path.to_string(),
                line: location[2].parse().ok(),
                error: Some(error.clone()),
            });
            current_error = None;
        }
    }

    (failing_tests, failures)
}

/// Jest and vitest share their count vocabulary (`N failed`, `N passed`,
/// `N skipped`, `N total` / `(N)`), on a line starting with `Tests`.
/// Counting against that line keeps the `Test Suites:` line from winning.
fn jest_summary(output: &str) -> TestSummary {
    let source = output
        .lines()
        .find(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with("Tests:") || trimmed.starts_with("Tests ")
        })
        .unwrap_or(output);

    let failed = first_count(&COUNT_FAILED_RE, source);
    let passed = first_count(&COUNT_PASSED_RE, source);
    let skipped = first_count(&COUNT_SKIPPED_RE, source);
    let mut total = first_count(&COUNT_TOTAL_RE, source);
    if total == 0 {
        total = passed + failed + skipped;
    }
    TestSummary {
        total,
        passed,
        failed,
        skipped,
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

fn looks_like_js_path(token: &str) -> bool {
    let stripped = token.trim_end_matches(':');
    ["js", "jsx", "ts", "tsx", "mjs", "cjs"]
        .iter()
        .any(|ext| stripped.ends_with(&format!(".{ext}")))
}

fn first_count(pattern: &Regex, output: &str) -> u32 {
    pattern
        .captures(output)
        .map(|captures| parse_u32(&captures[1]))
        .unwrap_or(0)
}

fn parse_u32(digits: &str) -> u32 {
    digits.parse().unwrap_or(0)
}
