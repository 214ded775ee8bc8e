//! The error type storage backends speak.

use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[error("storage error: {kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// The entry does not exist and will not appear by retrying.
    #[display("File not found")]
    PermanentFileNotAvailable,
    /// The entry is momentarily unavailable (locked, being written).
    #[display("File temporarily not available")]
    TransientFileNotAvailable,
    #[display("Permission denied")]
    PermissionDenied,
    #[display("File name not allowed")]
    FileNameNotAllowed,
    #[display("Insufficient storage space")]
    InsufficientStorage,
    /// Anything that is the server's fault rather than the client's.
    #[display("Local error")]
    LocalError,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }

    pub fn with_source<E: Into<BoxError>>(kind: ErrorKind, source: E) -> Self {
        Error {
            kind,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::PermanentFileNotAvailable,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::FileNameNotAllowed,
            std::io::ErrorKind::StorageFull => ErrorKind::InsufficientStorage,
            _ => ErrorKind::LocalError,
        };
        Error::with_source(kind, err)
    }
}
