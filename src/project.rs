//! Project language/framework detection facade.
//!
//! Thin wrapper over the adapter registry used at runner construction
//! time and by `init`; callers that only need detection depend on this
//! instead of the full registry surface.

use std::path::Path;
use std::sync::Arc;

use crate::parser::{AdapterRegistry, Framework, Language};

/// Detects the language and test framework of a project directory.
#[derive(Clone)]
pub struct ProjectDetector {
    registry: Arc<AdapterRegistry>,
}

impl ProjectDetector {
    /// Creates a detector over an existing registry.
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    /// Identifies the language of a project directory.
    #[must_use]
    pub fn detect_language(&self, project_dir: &Path) -> Option<Language> {
        self.registry.detect_language(project_dir)
    }

    /// Identifies the framework for a known language, confidence-weighted.
    #[must_use]
    pub fn detect_framework(&self, language: Language, project_dir: &Path) -> Option<Framework> {
        self.registry.detect_framework(language, project_dir)
    }
}
