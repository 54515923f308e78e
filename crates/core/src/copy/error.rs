//! Error types for the copy engine.

use std::io;
use thiserror::Error;

/// Errors that end a copy abnormally.
///
/// Cancellation and a closed destination are not errors; they are reported
/// through [`CopyStop`](super::CopyStop).
#[derive(Debug, Error)]
pub enum CopyError {
    /// Reading from the source failed.
    #[error("Failed to read from source: {0}")]
    Read(#[source] io::Error),

    /// Writing to the destination failed.
    #[error("Failed to write to destination: {0}")]
    Write(#[source] io::Error),

    /// The copy options are unusable.
    #[error("Invalid copy options: {reason}")]
    InvalidOptions { reason: String },
}

impl CopyError {
    /// Creates a new invalid options error.
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Whether this error comes from the underlying I/O.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Write(_))
    }
}

/// Whether a write error means the destination has gone away.
pub(crate) fn is_destination_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WriteZero
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
