//! Ruby test-output parsing (minitest).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::language::{Framework, Language};
use super::{TestAdapter, TestFailure, TestOutput, TestSummary, push_unique};

/// Test file location after a `Failure:`/`Error:` block, either bare
/// (`test/models/user_test.rb:12`) or bracketed
/// (`UserTest#test_name [test/models/user_test.rb:12]`).
const MINITEST_LOCATION: &str = r"((?:\S+/)?\S+_test\.rb):(\d+)";
#[allow(clippy::expect_used)]
static MINITEST_LOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MINITEST_LOCATION).expect("minitest location regex is valid"));

/// Rails replay suggestion: `rails test <path>[:line]`.
const RAILS_SUGGESTION: &str = r"rails\s+test\s+(\S+?\.rb)(?::(\d+))?\b";
#[allow(clippy::expect_used)]
static RAILS_SUGGESTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(RAILS_SUGGESTION).expect("rails suggestion regex is valid"));

/// `Failure:` / `Error:` block opener.
const BLOCK_START: &str = r"^\s*(Failure|Error):\s*$";
#[allow(clippy::expect_used)]
static BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(BLOCK_START).expect("minitest block regex is valid"));

#[allow(clippy::expect_used)]
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+)\s+runs?,\s+(\d+)\s+assertions?,\s+(\d+)\s+failures?,\s+(\d+)\s+errors?(?:,\s+(\d+)\s+skips?)?",
    )
    .expect("minitest summary regex is valid")
});

/// Adapter for Ruby projects.
#[derive(Debug)]
pub struct RubyAdapter;

const FRAMEWORKS: &[Framework] = &[Framework::Minitest];

impl TestAdapter for RubyAdapter {
    fn language(&self) -> Language {
        Language::Ruby
    }

    fn supported_frameworks(&self) -> &'static [Framework] {
        FRAMEWORKS
    }

    fn default_framework(&self) -> Framework {
        Framework::Minitest
    }

    fn test_command(&self, _framework: Framework, path: Option<&Path>) -> String {
        match path {
            Some(path) => format!("bundle exec ruby -Itest {}", path.display()),
            None => "bundle exec rake test".to_string(),
        }
    }

    fn parse_output(&self, output: &str, _framework: Framework) -> TestOutput {
        let mut failing_tests = Vec::new();
        let mut failures = Vec::new();
        let mut in_failure_block = false;
        let mut block_error: Option<String> = None;

        for line in output.lines() {
            if BLOCK_START_RE.is_match(line) {
                in_failure_block = true;
                block_error = None;
                continue;
            }

            if in_failure_block {
                if block_error.is_none() {
                    let described = line.trim();
                    if !described.is_empty() {
                        block_error = Some(described.to_string());
                    }
                }
                if let Some(captures) = MINITEST_LOCATION_RE.captures(line) {
                    let path = &captures[1];
                    push_unique(&mut failing_tests, path);
                    failures.push(TestFailure {
                        file: path.to_string(),
                        line: captures[2].parse().ok(),
                        error: block_error.clone(),
                    });
                    in_failure_block = false;
                }
                continue;
            }

            // Rails prints a replay suggestion per failing file even when
            // the failure block itself got truncated.
            if let Some(captures) = RAILS_SUGGESTION_RE.captures(line) {
                push_unique(&mut failing_tests, &captures[1]);
            }
        }

        let summary = SUMMARY_RE
            .captures(output)
            .map(|captures| {
                let total = parse_u32(&captures[1]);
                let failed =
                    parse_u32(&captures[3]) + parse_u32(&captures[4]);
                let skipped = captures.get(5).map_or(0, |skips| parse_u32(skips.as_str()));
                TestSummary {
                    total,
                    passed: total.saturating_sub(failed + skipped),
                    failed,
                    skipped,
                }
            })
            .unwrap_or_default();

        if failing_tests.is_empty() && summary.failed > 0 {
            debug!(
                failed = summary.failed,
                "Summary reports failures but no failing paths matched"
            );
        }

        TestOutput {
            passed: failing_tests.is_empty() && summary.failed == 0,
            failing_tests,
            failures,
            summary,
        }
    }

    fn failure_patterns(&self, _framework: Framework) -> Vec<&'static str> {
        vec![BLOCK_START, MINITEST_LOCATION, RAILS_SUGGESTION]
    }
}

fn parse_u32(digits: &str) -> u32 {
    digits.parse().unwrap_or(0)
}
