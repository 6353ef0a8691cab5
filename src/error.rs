//! Error types for key synchronization
//!
//! Every failure in a sync cycle is a [`SyncError`]. Callers that need to make
//! a decision (exit status, log level) inspect [`SyncError::kind`]; the cause
//! chain is available through [`std::error::Error::source`].

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The authorized_keys file contains a line that cannot be parsed
    MalformedLine,
    /// Fetching keys from the remote host failed
    Remote,
    /// Reading or writing the authorized_keys file failed
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MalformedLine => write!(f, "malformed-line"),
            ErrorKind::Remote => write!(f, "remote"),
            ErrorKind::Io => write!(f, "io"),
        }
    }
}

/// Errors that can occur during a sync cycle
#[derive(Debug, Error)]
pub enum SyncError {
    /// A line has fewer than two whitespace separated parts
    #[error("line {line} in authorized keys file malformed")]
    MalformedLine { line: usize },

    /// The HTTP request could not be made
    #[error("could not make request to {url}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The remote answered with a non-2xx status
    #[error("invalid status code from {url}: {status}")]
    Status { url: String, status: u16 },

    /// The response body could not be read
    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A filesystem operation failed
    #[error("could not {stage} authorized keys file {}", path.display())]
    Io {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MalformedLine { .. } => ErrorKind::MalformedLine,
            SyncError::Request { .. } | SyncError::Status { .. } | SyncError::Body { .. } => {
                ErrorKind::Remote
            }
            SyncError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(stage: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Render the error followed by its causes, `outer: inner: root`
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            rendered.push_str(": ");
            rendered.push_str(&err.to_string());
            cause = err.source();
        }
        rendered
    }
}
