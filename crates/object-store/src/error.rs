use thiserror::Error;

/// Errors returned by object backends.
///
/// `NotFound` is an ordinary lookup miss. Everything else means the
/// repository could not answer and is surfaced to filesystem callers as an
/// I/O failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The reference or object does not exist.
    #[error("not found")]
    NotFound,
    /// The repository is missing, unreadable, or the git process failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend produced fewer (or more) bytes than it declared.
    #[error("truncated object: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
    /// The backend returned data that does not parse as the expected object.
    #[error("corrupt object: {0}")]
    Corrupt(String),
}

impl BackendError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        BackendError::Unavailable(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        BackendError::Corrupt(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}

impl From<git2::Error> for BackendError {
    fn from(e: git2::Error) -> Self {
        match e.code() {
            git2::ErrorCode::NotFound | git2::ErrorCode::Peel | git2::ErrorCode::InvalidSpec => {
                BackendError::NotFound
            }
            _ => match e.class() {
                git2::ErrorClass::Odb | git2::ErrorClass::Zlib | git2::ErrorClass::Object => {
                    BackendError::Corrupt(e.message().to_string())
                }
                _ => BackendError::Unavailable(e.message().to_string()),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
