//! Integration tests for the adapter registry: realistic runner
//! transcripts in, canonical failure lists out.

use std::fs;

use tempfile::TempDir;
use tfq_core::{AdapterRegistry, Framework, Language};

fn registry() -> AdapterRegistry {
    AdapterRegistry::new()
}

// ==================== Jest (scenario: FAIL-line extraction) ====================

#[test]
fn test_jest_fail_lines_extracted_in_order() {
    let output = "FAIL src/a.test.ts\nPASS src/b.test.ts\nFAIL src/c.test.ts";
    let binding = registry();
    let adapter = binding.adapter(Language::JavaScript).unwrap();
    let result = adapter.parse_output(output, Framework::Jest);
    assert_eq!(result.failing_tests, vec!["src/a.test.ts", "src/c.test.ts"]);
}

#[test]
fn test_jest_realistic_transcript() {
    let output = "\
 PASS  src/util.test.ts
 FAIL  src/api/client.test.ts
  ● client › retries on 503

    expect(received).toBe(expected)

    Expected: 3
    Received: 2

Test Suites: 1 failed, 1 passed, 2 total
Tests:       1 failed, 4 passed, 5 total
Snapshots:   0 total
Time:        2.35 s
";
    let binding = registry();
    let adapter = binding.adapter(Language::JavaScript).unwrap();
    let result = adapter.parse_output(output, Framework::Jest);
    assert_eq!(result.failing_tests, vec!["src/api/client.test.ts"]);
    assert_eq!(result.summary.failed, 1);
    assert_eq!(result.summary.passed, 4);
    assert_eq!(result.summary.total, 5);
    assert!(!result.passed);
}

// ==================== pytest ====================

#[test]
fn test_pytest_realistic_transcript() {
    let output = "\
============================= test session starts ==============================
collected 4 items

tests/test_auth.py ..F.                                                  [100%]

=================================== FAILURES ===================================
_________________________ test_login_rejects_bad_token _________________________

    def test_login_rejects_bad_token():
>       assert login(\"bad\") is None
E       AssertionError: assert <User anon> is None

tests/test_auth.py:27: AssertionError
=========================== short test summary info ============================
FAILED tests/test_auth.py::test_login_rejects_bad_token - AssertionError
========================= 1 failed, 3 passed in 0.21s ==========================
";
    let binding = registry();
    let adapter = binding.adapter(Language::Python).unwrap();
    let result = adapter.parse_output(output, Framework::Pytest);
    assert_eq!(result.failing_tests, vec!["tests/test_auth.py"]);
    assert_eq!(result.summary.failed, 1);
    assert_eq!(result.summary.passed, 3);
    assert!(result.failures.iter().any(|failure| {
        failure.file == "tests/test_auth.py" && failure.line == Some(27)
    }));
}

// ==================== Minitest ====================

#[test]
fn test_minitest_realistic_transcript() {
    let output = "\
Run options: --seed 4242

# Running:

.F.

Failure:
UserTest#test_email_required [test/models/user_test.rb:18]:
Expected false to be truthy.

rails test test/models/user_test.rb:18

3 runs, 3 assertions, 1 failures, 0 errors, 0 skips
";
    let binding = registry();
    let adapter = binding.adapter(Language::Ruby).unwrap();
    let result = adapter.parse_output(output, Framework::Minitest);
    assert_eq!(result.failing_tests, vec!["test/models/user_test.rb"]);
    assert_eq!(result.summary.total, 3);
    assert_eq!(result.summary.failed, 1);
}

// ==================== Parser robustness ====================

#[test]
fn test_parsers_never_error_on_garbage() {
    let registry = registry();
    let garbage = "\u{1b}[31m\0\0 completely unrelated text 123 \u{1b}[0m";
    for (language, framework) in [
        (Language::JavaScript, Framework::Jest),
        (Language::JavaScript, Framework::Vitest),
        (Language::JavaScript, Framework::Mocha),
        (Language::JavaScript, Framework::Jasmine),
        (Language::JavaScript, Framework::Ava),
        (Language::Python, Framework::Pytest),
        (Language::Python, Framework::Unittest),
        (Language::Ruby, Framework::Minitest),
    ] {
        let adapter = registry.adapter(language).unwrap();
        let result = adapter.parse_output(garbage, framework);
        assert!(
            result.failing_tests.is_empty(),
            "{framework} extracted failures from garbage"
        );
    }
}

#[test]
fn test_parse_is_deterministic() {
    let output = "FAIL src/a.test.ts\nTests: 1 failed, 1 total\n";
    let binding = registry();
    let adapter = binding.adapter(Language::JavaScript).unwrap();
    let first = adapter.parse_output(output, Framework::Jest);
    let second = adapter.parse_output(output, Framework::Jest);
    assert_eq!(first.failing_tests, second.failing_tests);
    assert_eq!(first.summary, second.summary);
}

#[test]
fn test_failure_patterns_compile_for_every_framework() {
    let registry = registry();
    for language in registry.supported_languages() {
        let adapter = registry.adapter(language).unwrap();
        for framework in adapter.supported_frameworks() {
            for pattern in adapter.failure_patterns(*framework) {
                assert!(
                    regex::Regex::new(pattern).is_ok(),
                    "pattern {pattern} for {framework} does not compile"
                );
            }
        }
    }
}

// ==================== Registry detection ====================

#[test]
fn test_detect_language_priority_ruby_over_js() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("Gemfile"), "").unwrap();
    fs::write(tmp.path().join("package.json"), "{}").unwrap();

    assert_eq!(
        registry().detect_language(tmp.path()),
        Some(Language::Ruby)
    );
}

#[test]
fn test_detect_framework_end_to_end_vitest_project() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("package.json"),
        r#"{"devDependencies": {"vitest": "^1.0.0"}}"#,
    )
    .unwrap();
    fs::write(tmp.path().join("vitest.config.ts"), "export default {}").unwrap();

    let registry = registry();
    let language = registry.detect_language(tmp.path()).unwrap();
    assert_eq!(language, Language::JavaScript);
    assert_eq!(
        registry.detect_framework(language, tmp.path()),
        Some(Framework::Vitest)
    );
}

#[test]
fn test_unsupported_gate_lists_framework_and_replacement() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("manage.py"), "").unwrap();

    let err = registry().check_unsupported(tmp.path()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Django"));
    assert!(message.contains("pytest"));
    assert!(message.contains("--allow-unsupported"));
}

#[test]
fn test_unsupported_gate_passes_clean_project() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("pytest.ini"), "[pytest]\n").unwrap();
    assert!(registry().check_unsupported(tmp.path()).is_ok());
}
