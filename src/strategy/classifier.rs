//! Request Classifier
//!
//! Total function from a request path to exactly one category, checked in
//! priority order: file/blob prefix > API prefix > static extension > generic.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

// =============================================================================
// Request Category
// =============================================================================

/// Strategy category of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestCategory {
    /// File and blob endpoints
    File,
    /// Structured API endpoints
    Api,
    /// Versioned static assets
    Static,
    /// Everything else
    Generic,
}

impl RequestCategory {
    /// Key namespace for this category
    pub fn namespace(&self) -> &'static str {
        match self {
            RequestCategory::File => "file",
            RequestCategory::Api => "api",
            RequestCategory::Static => "static",
            RequestCategory::Generic => "generic",
        }
    }

    pub fn all() -> &'static [RequestCategory] {
        &[
            RequestCategory::File,
            RequestCategory::Api,
            RequestCategory::Static,
            RequestCategory::Generic,
        ]
    }
}

impl fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

// =============================================================================
// Classifier Configuration
// =============================================================================

/// Classification rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Path prefixes served by the file strategy (segment-aligned)
    pub file_prefixes: Vec<String>,
    /// Path prefixes served by the API strategy (segment-aligned)
    pub api_prefixes: Vec<String>,
    /// File extensions served by the static strategy (lowercase, no dot)
    pub static_extensions: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            file_prefixes: vec![
                "/api/files".to_string(),
                "/api/uploads".to_string(),
                "/files".to_string(),
                "/blobs".to_string(),
            ],
            api_prefixes: vec!["/api".to_string()],
            static_extensions: [
                "js", "mjs", "css", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "woff",
                "woff2", "ttf", "otf", "eot", "wasm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// =============================================================================
// Request Classifier
// =============================================================================

/// Maps request paths to categories
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    config: ClassifierConfig,
}

impl RequestClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a request path
    pub fn classify(&self, path: &str) -> RequestCategory {
        let category = if self.config.file_prefixes.iter().any(|p| has_segment_prefix(path, p)) {
            RequestCategory::File
        } else if self.config.api_prefixes.iter().any(|p| has_segment_prefix(path, p)) {
            RequestCategory::Api
        } else if self.is_static_asset(path) {
            RequestCategory::Static
        } else {
            RequestCategory::Generic
        };
        trace!(path, category = %category, "Classified request");
        category
    }

    fn is_static_asset(&self, path: &str) -> bool {
        extension(path).map_or(false, |ext| {
            self.config
                .static_extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
    }
}

/// `/files` matches `/files` and `/files/x`, not `/filesystem`
fn has_segment_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Extension of the last path segment
pub fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let classifier = RequestClassifier::new();
        assert_eq!(classifier.classify("/api/files/42"), RequestCategory::File);
        assert_eq!(classifier.classify("/api/files/42/download"), RequestCategory::File);
        // File prefix wins over static extension
        assert_eq!(classifier.classify("/files/report.png"), RequestCategory::File);
        assert_eq!(classifier.classify("/api/jobs/7"), RequestCategory::Api);
        // API prefix wins over static extension
        assert_eq!(classifier.classify("/api/schema.json.map"), RequestCategory::Api);
        assert_eq!(classifier.classify("/assets/app.3f9a.js"), RequestCategory::Static);
        assert_eq!(classifier.classify("/"), RequestCategory::Generic);
        assert_eq!(classifier.classify("/dashboard"), RequestCategory::Generic);
    }

    #[test]
    fn test_segment_aligned_prefixes() {
        let classifier = RequestClassifier::new();
        assert_eq!(classifier.classify("/filesystem"), RequestCategory::Generic);
        assert_eq!(classifier.classify("/apiary"), RequestCategory::Generic);
        assert_eq!(classifier.classify("/api"), RequestCategory::Api);
        assert_eq!(classifier.classify("/blobs"), RequestCategory::File);
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("/a/b/style.CSS"), Some("CSS"));
        assert_eq!(extension("/a/.hidden"), None);
        assert_eq!(extension("/a/noext"), None);
        assert_eq!(extension("/a.b/c"), None);
        assert!(RequestClassifier::new().classify("/LOGO.PNG") == RequestCategory::Static);
    }

    #[test]
    fn test_every_path_has_one_category() {
        let classifier = RequestClassifier::new();
        for path in ["", "/", "//", "/api/", "/files/", "/x.y.z", "/%20", "/api/files"] {
            let category = classifier.classify(path);
            assert!(RequestCategory::all().contains(&category));
        }
    }
}
