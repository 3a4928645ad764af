//! Language and framework tags.
//!
//! Both are closed enumerations; custom runner commands stay open through
//! `testCommands` config keys, so widening these enums is never required
//! to run an unusual framework.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Languages the project detector can identify.
///
/// TypeScript projects detect as `JavaScript`; the extension fallback
/// counts `.ts`/`.tsx` files toward it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lower")]
pub enum Language {
    /// JavaScript and TypeScript.
    JavaScript,
    /// Python.
    Python,
    /// Ruby.
    Ruby,
    /// Go (detectable; no bundled output parser).
    Go,
    /// Java (detectable; no bundled output parser).
    Java,
}

impl Language {
    /// Returns the stable string tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Ruby => "ruby",
            Self::Go => "go",
            Self::Java => "java",
        }
    }

    /// Source file extensions counted by the detection fallback and used
    /// for related-file discovery.
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::JavaScript => &["js", "jsx", "ts", "tsx", "mjs", "cjs"],
            Self::Python => &["py"],
            Self::Ruby => &["rb"],
            Self::Go => &["go"],
            Self::Java => &["java"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "javascript" | "typescript" | "js" | "ts" => Ok(Self::JavaScript),
            "python" | "py" => Ok(Self::Python),
            "ruby" | "rb" => Ok(Self::Ruby),
            "go" | "golang" => Ok(Self::Go),
            "java" => Ok(Self::Java),
            _ => Err(format!("unknown language: {s}")),
        }
    }
}

/// Test frameworks with bundled output parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lower")]
pub enum Framework {
    /// Jest (JavaScript).
    Jest,
    /// Vitest (JavaScript).
    Vitest,
    /// Mocha (JavaScript).
    Mocha,
    /// Jasmine (JavaScript).
    Jasmine,
    /// AVA (JavaScript).
    Ava,
    /// pytest (Python).
    Pytest,
    /// unittest (Python).
    Unittest,
    /// Minitest (Ruby).
    Minitest,
}

impl Framework {
    /// Returns the stable string tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jest => "jest",
            Self::Vitest => "vitest",
            Self::Mocha => "mocha",
            Self::Jasmine => "jasmine",
            Self::Ava => "ava",
            Self::Pytest => "pytest",
            Self::Unittest => "unittest",
            Self::Minitest => "minitest",
        }
    }

    /// The language this framework belongs to.
    #[must_use]
    pub fn language(&self) -> Language {
        match self {
            Self::Jest | Self::Vitest | Self::Mocha | Self::Jasmine | Self::Ava => {
                Language::JavaScript
            }
            Self::Pytest | Self::Unittest => Language::Python,
            Self::Minitest => Language::Ruby,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jest" => Ok(Self::Jest),
            "vitest" => Ok(Self::Vitest),
            "mocha" => Ok(Self::Mocha),
            "jasmine" => Ok(Self::Jasmine),
            "ava" => Ok(Self::Ava),
            "pytest" => Ok(Self::Pytest),
            "unittest" => Ok(Self::Unittest),
            "minitest" => Ok(Self::Minitest),
            _ => Err(format!("unknown framework: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_language_as_str_roundtrip() {
        for language in [
            Language::JavaScript,
            Language::Python,
            Language::Ruby,
            Language::Go,
            Language::Java,
        ] {
            assert_eq!(language.as_str().parse::<Language>().unwrap(), language);
        }
    }

    #[test]
    fn test_language_typescript_aliases_to_javascript() {
        assert_eq!(
            "typescript".parse::<Language>().unwrap(),
            Language::JavaScript
        );
        assert_eq!("ts".parse::<Language>().unwrap(), Language::JavaScript);
    }

    #[test]
    fn test_language_from_str_unknown() {
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_framework_as_str_roundtrip() {
        for framework in [
            Framework::Jest,
            Framework::Vitest,
            Framework::Mocha,
            Framework::Jasmine,
            Framework::Ava,
            Framework::Pytest,
            Framework::Unittest,
            Framework::Minitest,
        ] {
            assert_eq!(framework.as_str().parse::<Framework>().unwrap(), framework);
        }
    }

    #[test]
    fn test_framework_language_mapping() {
        assert_eq!(Framework::Jest.language(), Language::JavaScript);
        assert_eq!(Framework::Pytest.language(), Language::Python);
        assert_eq!(Framework::Minitest.language(), Language::Ruby);
    }

    #[test]
    fn test_language_serde_uses_lowercase() {
        let json = serde_json::to_string(&Language::JavaScript).unwrap();
        assert_eq!(json, "\"javascript\"");
    }
}
