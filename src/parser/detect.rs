//! Project language and framework detection.
//!
//! Language detection checks marker files in a fixed priority order
//! (language-specific manifests beat generic ones), then falls back to
//! counting source files by extension. Framework detection is
//! confidence-weighted: a dedicated config file beats a declared manifest
//! dependency, which beats the mere presence of a test directory.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::language::{Framework, Language};

/// Evidence weight of a framework-specific config file.
const WEIGHT_CONFIG_FILE: u32 = 100;
/// Evidence weight of a declared manifest dependency.
const WEIGHT_DEPENDENCY: u32 = 50;
/// Evidence weight of a conventional test directory.
const WEIGHT_TEST_DIR: u32 = 10;

/// Directories never descended into by the extension fallback.
const VENDOR_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "__pycache__",
];

/// Marker files per language, in detection priority order.
const LANGUAGE_MARKERS: &[(Language, &[&str])] = &[
    (Language::Ruby, &["Gemfile", "Gemfile.lock"]),
    (
        Language::Python,
        &["requirements.txt", "setup.py", "pyproject.toml", "Pipfile"],
    ),
    (Language::JavaScript, &["package.json"]),
    (Language::Go, &["go.mod"]),
    (Language::Java, &["pom.xml", "build.gradle"]),
];

/// Identifies the language of a project directory.
pub(crate) fn detect_language(project_dir: &Path) -> Option<Language> {
    for (language, markers) in LANGUAGE_MARKERS {
        if markers
            .iter()
            .any(|marker| project_dir.join(marker).is_file())
        {
            debug!(language = %language, "Language detected from marker file");
            return Some(*language);
        }
    }

    extension_fallback(project_dir)
}

/// Counts source files per language, skipping hidden and vendor
/// directories; the largest count wins, ties resolving in marker
/// priority order.
fn extension_fallback(project_dir: &Path) -> Option<Language> {
    let mut counts = [0usize; LANGUAGE_MARKERS.len()];
    let mut stack = vec![project_dir.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    path = %dir.display(),
                    error = %error,
                    "Skipping unreadable directory during language detection"
                );
                continue;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();

            if path.is_dir() {
                if name.starts_with('.') || VENDOR_DIRS.contains(&name.as_ref()) {
                    continue;
                }
                stack.push(path);
                continue;
            }

            let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
                continue;
            };
            for (index, (language, _)) in LANGUAGE_MARKERS.iter().enumerate() {
                if language.extensions().contains(&extension) {
                    counts[index] += 1;
                    break;
                }
            }
        }
    }

    let (best_index, best_count) = counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    if *best_count == 0 {
        return None;
    }

    let language = LANGUAGE_MARKERS[best_index].0;
    debug!(language = %language, files = best_count, "Language detected from extension counts");
    Some(language)
}

/// Identifies the framework of a project, confidence-weighted.
///
/// Candidates are the language's supported frameworks; ties resolve by
/// their preference order. Returns `None` when no evidence exists at all.
pub(crate) fn detect_framework(language: Language, project_dir: &Path) -> Option<Framework> {
    let candidates: &[Framework] = match language {
        Language::JavaScript => &[
            Framework::Jest,
            Framework::Vitest,
            Framework::Mocha,
            Framework::Jasmine,
            Framework::Ava,
        ],
        Language::Python => &[Framework::Pytest, Framework::Unittest],
        Language::Ruby => &[Framework::Minitest],
        Language::Go | Language::Java => return None,
    };

    let has_test_dir = ["test", "tests", "spec"]
        .iter()
        .any(|dir| project_dir.join(dir).is_dir());

    let mut best: Option<(Framework, u32)> = None;
    for framework in candidates {
        let mut score = framework_evidence(*framework, project_dir);
        if has_test_dir {
            score += WEIGHT_TEST_DIR;
        }
        debug!(framework = %framework, score, "Framework evidence scored");

        // Strict comparison keeps the earlier (preferred) candidate on ties
        if score > 0 && best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((*framework, score));
        }
    }

    best.map(|(framework, _)| framework)
}

/// Config-file and manifest-dependency evidence for one framework.
fn framework_evidence(framework: Framework, dir: &Path) -> u32 {
    let mut score = 0;

    match framework {
        Framework::Jest => {
            if any_config(dir, "jest.config", &["js", "ts", "mjs", "cjs", "json"]) {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_key(dir, "jest") {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_dependency(dir, "jest") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Vitest => {
            if any_config(dir, "vitest.config", &["js", "ts", "mjs", "cjs", "mts", "cts"]) {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_dependency(dir, "vitest") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Mocha => {
            if any_config(dir, ".mocharc", &["js", "cjs", "json", "yml", "yaml"]) {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_dependency(dir, "mocha") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Jasmine => {
            if dir.join("spec").join("support").join("jasmine.json").is_file() {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_dependency(dir, "jasmine") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Ava => {
            if any_config(dir, "ava.config", &["js", "cjs", "mjs"])
                || package_json_has_key(dir, "ava")
            {
                score += WEIGHT_CONFIG_FILE;
            }
            if package_json_has_dependency(dir, "ava") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Pytest => {
            if dir.join("pytest.ini").is_file()
                || file_contains(&dir.join("pyproject.toml"), "[tool.pytest.ini_options]")
                || file_contains(&dir.join("setup.cfg"), "[tool:pytest]")
            {
                score += WEIGHT_CONFIG_FILE;
            }
            if python_manifest_lists(dir, "pytest") {
                score += WEIGHT_DEPENDENCY;
            }
        }
        Framework::Unittest => {
            // Standard library: never declared, never configured. Evidence
            // is only the shared test-directory signal, so pytest wins any
            // project that mentions it.
        }
        Framework::Minitest => {
            if dir.join("test").join("test_helper.rb").is_file() {
                score += WEIGHT_CONFIG_FILE;
            }
            if file_contains(&dir.join("Gemfile"), "minitest") {
                score += WEIGHT_DEPENDENCY;
            }
        }
    }

    score
}

/// An unsupported framework found by the pre-flight scan.
#[derive(Debug, Clone)]
pub struct UnsupportedFramework {
    /// Display name, e.g. "Django".
    pub name: &'static str,
    /// What was found, e.g. "manage.py present".
    pub evidence: String,
    /// Supported framework to migrate to.
    pub suggestion: &'static str,
}

/// Scans for frameworks tfq has no parser for.
///
/// Returns every match so the error can list all of them at once.
pub(crate) fn scan_unsupported(dir: &Path) -> Vec<UnsupportedFramework> {
    let mut detected = Vec::new();

    if dir.join("manage.py").is_file() {
        detected.push(UnsupportedFramework {
            name: "Django",
            evidence: "manage.py present".to_string(),
            suggestion: "pytest",
        });
    } else if let Some(manifest) = python_manifest_with(dir, "django") {
        detected.push(UnsupportedFramework {
            name: "Django",
            evidence: format!("django declared in {manifest}"),
            suggestion: "pytest",
        });
    }

    if let Some(manifest) = python_manifest_with(dir, "nose2") {
        detected.push(UnsupportedFramework {
            name: "nose2",
            evidence: format!("nose2 declared in {manifest}"),
            suggestion: "pytest",
        });
    }

    if dir.join(".rspec").is_file() || dir.join("spec").join("spec_helper.rb").is_file() {
        detected.push(UnsupportedFramework {
            name: "RSpec",
            evidence: ".rspec or spec/spec_helper.rb present".to_string(),
            suggestion: "minitest",
        });
    } else if file_contains(&dir.join("Gemfile"), "rspec") {
        detected.push(UnsupportedFramework {
            name: "RSpec",
            evidence: "rspec declared in Gemfile".to_string(),
            suggestion: "minitest",
        });
    }

    if file_contains(&dir.join("Gemfile"), "cucumber") || dir.join("features").is_dir() {
        detected.push(UnsupportedFramework {
            name: "Cucumber",
            evidence: "cucumber gem or features/ directory present".to_string(),
            suggestion: "minitest",
        });
    }

    if file_contains(&dir.join("Gemfile"), "test-unit") {
        detected.push(UnsupportedFramework {
            name: "Test::Unit",
            evidence: "test-unit declared in Gemfile".to_string(),
            suggestion: "minitest",
        });
    }

    detected
}

/// True when any `<stem>.<ext>` config file exists in `dir`.
fn any_config(dir: &Path, stem: &str, extensions: &[&str]) -> bool {
    extensions
        .iter()
        .any(|ext| dir.join(format!("{stem}.{ext}")).is_file())
}

/// Case-insensitive substring check on a file's contents; missing or
/// unreadable files are simply "no".
fn file_contains(path: &Path, needle: &str) -> bool {
    fs::read_to_string(path)
        .map(|content| content.to_ascii_lowercase().contains(needle))
        .unwrap_or(false)
}

/// True when `package.json` declares `name` under dependencies or
/// devDependencies.
fn package_json_has_dependency(dir: &Path, name: &str) -> bool {
    let Ok(raw) = fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return false;
    };

    ["dependencies", "devDependencies"].iter().any(|section| {
        manifest
            .get(section)
            .and_then(|deps| deps.get(name))
            .is_some()
    })
}

/// True when `package.json` carries a top-level config key of this name.
fn package_json_has_key(dir: &Path, key: &str) -> bool {
    let Ok(raw) = fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(&raw)
        .map(|manifest| manifest.get(key).is_some())
        .unwrap_or(false)
}

/// True when any Python manifest declares the package.
fn python_manifest_lists(dir: &Path, name: &str) -> bool {
    python_manifest_with(dir, name).is_some()
}

/// Returns the name of the first Python manifest declaring the package.
fn python_manifest_with(dir: &Path, name: &str) -> Option<&'static str> {
    const MANIFESTS: &[&str] = &["requirements.txt", "pyproject.toml", "Pipfile", "setup.py"];
    MANIFESTS
        .iter()
        .find(|manifest| file_contains(&dir.join(manifest), name))
        .copied()
}
