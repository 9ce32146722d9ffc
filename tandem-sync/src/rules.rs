//! Protected-path rules: exclusion patterns and the quarantine area

use tracing::trace;

/// Marker embedded in the names of in-flight atomic write temp files
pub const TEMP_MARKER: &str = ".tandem-tmp.";

/// Default name of the quarantine directory at the local root
pub const DEFAULT_QUARANTINE_DIR: &str = ".tandem-quarantine";

/// Decides which path keys take part in sync and where quarantined content goes
#[derive(Debug, Clone)]
pub struct PathRules {
    quarantine_dir: String,
    patterns: Vec<String>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self::new(DEFAULT_QUARANTINE_DIR, vec![".git".to_string()])
    }
}

impl PathRules {
    pub fn new(quarantine_dir: impl Into<String>, patterns: Vec<String>) -> Self {
        let dir = quarantine_dir.into();
        let dir = dir.trim_matches('/').to_string();
        let quarantine_dir = if dir.is_empty() {
            DEFAULT_QUARANTINE_DIR.to_string()
        } else {
            dir
        };
        Self {
            quarantine_dir,
            patterns,
        }
    }

    pub fn quarantine_dir(&self) -> &str {
        &self.quarantine_dir
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Path lies inside the quarantine area
    pub fn is_quarantined(&self, path: &str) -> bool {
        path == self.quarantine_dir
            || path
                .strip_prefix(self.quarantine_dir.as_str())
                .map_or(false, |rest| rest.starts_with('/'))
    }

    /// Some component of the path matches an exclusion pattern, or it is a temp file
    pub fn is_excluded(&self, path: &str) -> bool {
        for component in path.split('/') {
            if component.starts_with('.') && component.contains(TEMP_MARKER) {
                return true;
            }
            if self.patterns.iter().any(|p| matches_pattern(p, component)) {
                trace!("Excluding path: {} (component {})", path, component);
                return true;
            }
        }
        false
    }

    /// Never synchronized as a normal change
    pub fn is_protected(&self, path: &str) -> bool {
        self.is_quarantined(path) || self.is_excluded(path)
    }

    /// Quarantine location mirroring the original relative path
    pub fn quarantine_path(&self, path: &str) -> String {
        format!("{}/{}", self.quarantine_dir, path.trim_start_matches('/'))
    }
}

/// Simple glob matching: `*suffix`, `prefix*` or an exact name
fn matches_pattern(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name
}
