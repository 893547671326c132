//! Local Store errors
//!
//! The store is a best-effort cache, so callers mostly log these. The CLI
//! uses [`StorageError::recovery_suggestion`] when the cache cannot be
//! opened at all.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why the cache location could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationProblem {
    PermissionDenied,
    NoSpace,
    Other,
}

impl LocationProblem {
    fn classify(error: &io::Error) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return LocationProblem::PermissionDenied;
        }
        let msg = error.to_string().to_lowercase();
        if ["no space left", "disk full", "quota exceeded", "not enough space"]
            .iter()
            .any(|needle| msg.contains(needle))
        {
            LocationProblem::NoSpace
        } else {
            LocationProblem::Other
        }
    }
}

impl fmt::Display for LocationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LocationProblem::PermissionDenied => "permission denied",
            LocationProblem::NoSpace => "out of space",
            LocationProblem::Other => "unavailable",
        })
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// The cache directory or file cannot be created
    #[error("Cache location '{path}' {problem}: {source}")]
    Location {
        path: PathBuf,
        problem: LocationProblem,
        #[source]
        source: io::Error,
    },

    /// A cached value could not be encoded or decoded
    #[error("Cached entry '{key}' is unreadable: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Cache was written by a newer build
    #[error("Cache schema v{found} is newer than supported v{expected}")]
    SchemaVersion { found: i32, expected: i32 },

    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache lock poisoned")]
    Poisoned,

    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Wrap an I/O failure on a cache path
    pub fn at_path(error: io::Error, path: PathBuf) -> Self {
        StorageError::Location {
            path,
            problem: LocationProblem::classify(&error),
            source: error,
        }
    }

    /// Whether the user can fix it without deleting the cache
    pub fn is_recoverable(&self) -> bool {
        match self {
            StorageError::Location { problem, .. } => *problem != LocationProblem::Other,
            StorageError::InvalidValue { .. } => true,
            _ => false,
        }
    }

    /// Hint shown next to the error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::Location { problem, .. } => Some(match problem {
                LocationProblem::PermissionDenied => {
                    "Check permissions on the helpline data directory (config key data_dir)."
                }
                LocationProblem::NoSpace => "Free up disk space and try again.",
                LocationProblem::Other => "Point data_dir at a writable directory.",
            }),
            StorageError::InvalidValue { .. } => {
                Some("The entry is replaced on the next successful refresh.")
            }
            StorageError::SchemaVersion { .. } => {
                Some("Remove helpline.db from the data directory to rebuild the cache.")
            }
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_classification() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StorageError::at_path(io_err, PathBuf::from("/srv/helpline"));

        assert!(matches!(
            err,
            StorageError::Location {
                problem: LocationProblem::PermissionDenied,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_no_space_detection() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let err = StorageError::at_path(io_err, PathBuf::from("/full"));

        assert!(matches!(
            err,
            StorageError::Location {
                problem: LocationProblem::NoSpace,
                ..
            }
        ));
        assert_eq!(
            err.recovery_suggestion(),
            Some("Free up disk space and try again.")
        );
    }

    #[test]
    fn test_invalid_value_names_key() {
        let source = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err = StorageError::InvalidValue {
            key: "messages:t-1".to_string(),
            source,
        };

        assert!(err.to_string().contains("messages:t-1"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_schema_version_not_recoverable() {
        let err = StorageError::SchemaVersion {
            found: 9,
            expected: 1,
        };
        assert!(!err.is_recoverable());
        assert!(err.recovery_suggestion().unwrap().contains("helpline.db"));
    }
}
