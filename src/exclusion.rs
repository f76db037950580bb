//! Exclusion policy for directories
//!
//! A directory is excluded when the marker file sits directly inside it.
//! The reserved state directory holds the index itself and is always skipped.

use std::io::ErrorKind;
use std::path::Path;

use crate::config::IndexConfig;

/// Decides whether a directory subtree takes part in a scan
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    marker: String,
    state_dir: String,
}

impl ExclusionPolicy {
    /// Create a policy from a marker file name and the reserved directory name
    pub fn new(marker: impl Into<String>, state_dir: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Create a policy from the index configuration
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.ignore_marker.clone(), config.state_dir.clone())
    }

    /// Check whether a directory name is the reserved state directory (case-sensitive)
    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.state_dir
    }

    /// Check whether the marker file exists directly inside `dir`
    ///
    /// Errors other than "not found" fail open: the directory is scanned.
    pub fn is_excluded(&self, dir: &Path) -> bool {
        let marker_path = dir.join(&self.marker);
        match std::fs::symlink_metadata(&marker_path) {
            Ok(_) => {
                log::debug!("Excluding {:?}: found {}", dir, self.marker);
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                log::warn!("Cannot check marker {:?}, scanning anyway: {}", marker_path, e);
                false
            }
        }
    }

    /// Whether the walker should descend into a directory
    ///
    /// `name` is `None` for the root, which is never treated as reserved.
    pub fn should_descend(&self, dir: &Path, name: Option<&str>) -> bool {
        if name.is_some_and(|n| self.is_reserved(n)) {
            return false;
        }
        !self.is_excluded(dir)
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_marker_excludes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let policy = ExclusionPolicy::default();
        assert!(!policy.is_excluded(dir.path()));

        fs::write(dir.path().join(".visionsignore"), b"").unwrap();
        assert!(policy.is_excluded(dir.path()));
    }

    #[test]
    fn test_marker_is_not_inherited_by_check() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("child");
        fs::create_dir(&child).unwrap();
        fs::write(dir.path().join(".visionsignore"), b"").unwrap();

        let policy = ExclusionPolicy::default();
        // Only the directory holding the marker reports excluded.
        assert!(policy.is_excluded(dir.path()));
        assert!(!policy.is_excluded(&child));
    }

    #[test]
    fn test_reserved_name_is_case_sensitive() {
        let policy = ExclusionPolicy::default();
        assert!(policy.is_reserved(".visions"));
        assert!(!policy.is_reserved(".Visions"));
        assert!(!policy.is_reserved("visions"));
    }

    #[test]
    fn test_should_descend() {
        let dir = tempfile::tempdir().unwrap();
        let policy = ExclusionPolicy::new(".skip", ".state");

        assert!(policy.should_descend(dir.path(), None));
        assert!(!policy.should_descend(dir.path(), Some(".state")));

        fs::write(dir.path().join(".skip"), b"").unwrap();
        assert!(!policy.should_descend(dir.path(), None));
    }

    #[test]
    fn test_missing_directory_fails_open() {
        let policy = ExclusionPolicy::default();
        assert!(!policy.is_excluded(Path::new("/definitely/not/here")));
    }
}
