//! Error types for the media index

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while indexing a root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Metadata store operation failed
    DatabaseError,
    /// Dimension probing failed
    ProbeError,
    /// Path is not valid UTF-8 or escapes the root
    InvalidPath,
    /// Root does not exist, is not a directory, or cannot be resolved
    InvalidRoot,
    /// Configuration or settings file could not be used
    ConfigError,
    /// Another reconciliation of the same root is in flight
    AlreadyRunning,
    /// The run was cancelled before commit
    Cancelled,
    /// Unknown error
    Unknown,
}

/// Represents an error that occurred while indexing
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct IndexError {
    /// The kind of error
    pub kind: IndexErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl IndexError {
    /// Create a new index error
    pub fn new(kind: IndexErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            IndexErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::DatabaseError, None, message)
    }

    /// Create a probing error
    pub fn probe_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::ProbeError, Some(path), message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::InvalidPath, Some(path), message)
    }

    /// Create an invalid root error
    pub fn invalid_root(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::InvalidRoot, Some(path), message)
    }

    /// Create a configuration error
    pub fn config_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(IndexErrorKind::ConfigError, path, message)
    }

    /// Create an already-running error for a root
    pub fn already_running(root: PathBuf) -> Self {
        Self::new(
            IndexErrorKind::AlreadyRunning,
            Some(root.clone()),
            format!("Reconciliation already running for {:?}", root),
        )
    }

    /// Create a cancellation error
    pub fn cancelled(root: PathBuf) -> Self {
        Self::new(
            IndexErrorKind::Cancelled,
            Some(root),
            "Reconciliation cancelled before commit",
        )
    }

    /// Attach a path to an error that was created without one
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => IndexErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => IndexErrorKind::NotFound,
            _ => IndexErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<walkdir::Error> for IndexError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        let kind = match err.io_error().map(|e| e.kind()) {
            Some(std::io::ErrorKind::PermissionDenied) => IndexErrorKind::PermissionDenied,
            Some(std::io::ErrorKind::NotFound) => IndexErrorKind::NotFound,
            _ => IndexErrorKind::IoError,
        };
        Self::new(kind, path, err.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_error(None, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(IndexError::from(denied).kind, IndexErrorKind::PermissionDenied);

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(IndexError::from(missing).kind, IndexErrorKind::NotFound);

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(IndexError::from(other).kind, IndexErrorKind::IoError);
    }

    #[test]
    fn test_with_path_keeps_existing_path() {
        let err = IndexError::not_found(PathBuf::from("/a")).with_path("/b");
        assert_eq!(err.path, Some(PathBuf::from("/a")));

        let err = IndexError::database_error("locked").with_path("/root");
        assert_eq!(err.path, Some(PathBuf::from("/root")));
    }
}
