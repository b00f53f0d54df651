use std::path::PathBuf;

use object_store::BackendError;
use thiserror::Error;

/// Outcome of a filesystem operation that did not produce a result.
///
/// `NotFound` and `PermissionDenied` are expected answers. The backend
/// variants mean the repository could not be read and surface as I/O errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a symbolic link")]
    NotASymlink,
    #[error("bad file handle")]
    BadHandle,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("corrupt object: {0}")]
    Corrupt(String),
}

impl FsError {
    /// Whether this is an ordinary answer rather than a failure worth a warning.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FsError::NotFound
                | FsError::PermissionDenied
                | FsError::NotADirectory
                | FsError::IsADirectory
                | FsError::NotASymlink
        )
    }
}

impl From<BackendError> for FsError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound => FsError::NotFound,
            BackendError::Unavailable(msg) => FsError::BackendUnavailable(msg),
            e @ BackendError::Truncated { .. } => FsError::Corrupt(e.to_string()),
            BackendError::Corrupt(msg) => FsError::Corrupt(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Failure of an external collaborator (ACL source or repository listing).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {what}: {message}")]
    Invalid { what: String, message: String },
    #[error("command failed: {0}")]
    Command(String),
}

impl SourceError {
    pub fn invalid(what: impl Into<String>, message: impl ToString) -> Self {
        SourceError::Invalid {
            what: what.into(),
            message: message.to_string(),
        }
    }
}
