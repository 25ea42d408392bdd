//! Error types shared by the queue poller, the activity file processor and the
//! object store helpers.

use crate::activity::ActivityKind;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of a transport failure.
///
/// Both the queue and the object store map their SDK errors onto this set so
/// that retry decisions never depend on a particular vendor's error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The queue does not exist.
    QueueNotFound,
    /// The credentials in use may not read the resource.
    AccessDenied,
    /// The object or bucket does not exist.
    NotFound,
    /// The object store already holds an object under the requested key.
    AlreadyExists,
    /// The operation did not complete in the allotted time.
    Timeout,
    /// Anything else. Callers may retry or rely on redelivery.
    Transient,
}

impl ErrorKind {
    /// Fatal kinds point at misconfiguration; retrying them never helps.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::QueueNotFound | ErrorKind::AccessDenied)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::QueueNotFound => "queue not found",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Transient => "transient error",
        };
        f.write_str(s)
    }
}

/// A failed call against the queue or the object store.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Errors raised while turning provider XML into listener calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed activity xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to deserialize {kind}: {source}")]
    Decode {
        kind: ActivityKind,
        #[source]
        source: quick_xml::DeError,
    },
    #[error("failed to deserialize activity batch: {0}")]
    Batch(#[source] quick_xml::DeError),
    #[error("listener failed on {kind}: {source}")]
    Listener {
        kind: ActivityKind,
        #[source]
        source: BoxError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Only transport errors can be fatal. Decode and listener failures are
    /// left to queue redelivery.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
