//! Error taxonomy shared by the reader, the format adapters and the dispatcher.

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Reader sizing rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The origin did not report a length or does not serve ranges.
    #[error("remote length unknown: {0}")]
    LengthUnknown(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("origin timed out: {0}")]
    Timeout(String),

    /// The origin answered a range request with something other than 206.
    #[error("origin answered with unexpected status {0}")]
    OriginStatus(u16),

    #[error("offset {offset} is outside of 0..={length}")]
    OutOfRange { offset: i128, length: u64 },

    #[error("file not found in archive: {0}")]
    EntryNotFound(String),

    #[error("file index {index} out of archive boundary ({count} entries)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("do not support {0}")]
    UnsupportedFormat(String),

    #[error("fail to detect file type: {0}")]
    MimeDetection(String),

    #[error("request canceled")]
    Canceled,

    /// Malformed archive data, or data this build cannot decode.
    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("{0}")]
    BadRequest(String),

    /// Rejected by the access policy.
    #[error("fail to proxy: {0}")]
    Forbidden(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Whether a caller may retry the failed range fetch unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout(_) => true,
            Error::OriginStatus(status) => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn archive(err: impl std::fmt::Display) -> Self {
        Error::Archive(err.to_string())
    }

    /// Builds an equal error from a borrowed one, for errors a decoder only
    /// hands out behind a shared reference.
    pub(crate) fn reissue(&self) -> Self {
        match self {
            Error::InvalidConfiguration(msg) => Error::InvalidConfiguration(msg.clone()),
            Error::LengthUnknown(msg) => Error::LengthUnknown(msg.clone()),
            Error::Transport(msg) => Error::Transport(msg.clone()),
            Error::Timeout(msg) => Error::Timeout(msg.clone()),
            Error::OriginStatus(status) => Error::OriginStatus(*status),
            Error::OutOfRange { offset, length } => Error::OutOfRange {
                offset: *offset,
                length: *length,
            },
            Error::EntryNotFound(name) => Error::EntryNotFound(name.clone()),
            Error::IndexOutOfRange { index, count } => Error::IndexOutOfRange {
                index: *index,
                count: *count,
            },
            Error::UnsupportedFormat(msg) => Error::UnsupportedFormat(msg.clone()),
            Error::MimeDetection(msg) => Error::MimeDetection(msg.clone()),
            Error::Canceled => Error::Canceled,
            Error::Archive(msg) => Error::Archive(msg.clone()),
            Error::BadRequest(msg) => Error::BadRequest(msg.clone()),
            Error::Forbidden(msg) => Error::Forbidden(msg.clone()),
            Error::MethodNotAllowed => Error::MethodNotAllowed,
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

impl From<io::Error> for Error {
    /// Recovers an [`Error`] that was boxed into an `io::Error` while passing
    /// through a `Read`/`Seek` consumer.
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(ours)) => *ours,
                _ => Error::Archive("unrecoverable reader error".to_string()),
            };
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Error::Archive(err.to_string()),
            _ => Error::Io(err),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Io(inner) => inner.kind(),
            Error::OutOfRange { .. } => io::ErrorKind::InvalidInput,
            Error::Timeout(_) => io::ErrorKind::TimedOut,
            Error::Archive(_) => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Error::OriginStatus(status.as_u16())
        } else {
            Error::Transport(err.to_string())
        }
    }
}
