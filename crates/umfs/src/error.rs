//! Storage error types.
//!
//! Backends speak [`BackendError`]; the file handle and provider wrap every
//! backend failure into [`StorageError`] with the operation and subpath it
//! happened on. Callers only ever see [`StorageError`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error returned by a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    /// Resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Stored bytes could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a NotFound error.
    pub fn not_found(locator: impl Into<String>) -> Self {
        Self::NotFound(locator.into())
    }

    /// Create an InvalidData error.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap an I/O error, keeping "not found" distinguishable.
    pub fn from_io(err: io::Error, locator: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(locator.into()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(locator.into()),
            _ => Self::Io(err),
        }
    }

    /// Returns true for [`BackendError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidData(e.to_string())
    }
}

/// Backend result type.
pub type BackendResult<T> = Result<T, BackendError>;

/// Error surfaced by file handles and the storage provider.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Source file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The authorization hook rejected the file.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Malformed subpath, buffer size, or empty content.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not allowed in the handle's lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Destination already exists. Reserved for backends with strict create.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backing store failure on primary content.
    #[error("I/O error during {op} of {subpath}: {source}")]
    Io {
        op: &'static str,
        subpath: String,
        #[source]
        source: BackendError,
    },

    /// Backing store failure on the metadata side-car.
    #[error("metadata I/O error during {op} of {subpath}: {source}")]
    MetadataIo {
        op: &'static str,
        subpath: String,
        #[source]
        source: BackendError,
    },

    /// The operation observed its cancellation token.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl StorageError {
    /// Create a NotFound error.
    pub fn not_found(subpath: impl Into<String>) -> Self {
        Self::NotFound(subpath.into())
    }

    /// Create an AccessDenied error.
    pub fn access_denied(subpath: impl Into<String>) -> Self {
        Self::AccessDenied(subpath.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an InvalidState error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a Cancelled error.
    pub fn cancelled(op: impl Into<String>) -> Self {
        Self::Cancelled(op.into())
    }
}

/// Convert StorageError to std::io::Error for compatibility.
impl From<StorageError> for io::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            StorageError::AccessDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            StorageError::InvalidArgument(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            StorageError::InvalidState(msg) => io::Error::other(msg),
            StorageError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            StorageError::Io {
                source: BackendError::Io(e),
                ..
            } => e,
            e @ (StorageError::Io { .. } | StorageError::MetadataIo { .. }) => io::Error::other(e),
            StorageError::Cancelled(msg) => io::Error::new(io::ErrorKind::Interrupted, msg),
        }
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Fatal problem with provider configuration, raised at construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("storage root must not be empty")]
    EmptyRoot,

    #[error("buffer size must be at least 1 byte")]
    ZeroBufferSize,

    #[error("storage root is not valid UTF-8: {}", .0.display())]
    NonUtf8Root(PathBuf),

    #[error("failed to read options from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse options: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_keeps_not_found() {
        let err = BackendError::from_io(io::Error::from(io::ErrorKind::NotFound), "a/b");
        assert!(err.is_not_found());

        let err = BackendError::from_io(io::Error::other("boom"), "a/b");
        assert!(matches!(err, BackendError::Io(_)));
    }

    #[test]
    fn test_io_error_mapping() {
        let io_err: io::Error = StorageError::access_denied("x.png").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        let io_err: io::Error = StorageError::Io {
            op: "read",
            subpath: "x.png".into(),
            source: BackendError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")),
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_display_includes_context() {
        let err = StorageError::MetadataIo {
            op: "flush",
            subpath: "docs/a.txt".into(),
            source: BackendError::other("disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("flush"));
        assert!(msg.contains("docs/a.txt"));
        assert!(msg.contains("disk full"));
    }
}
