//! Error types for the transcode module.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`JobRegistry`](super::JobRegistry) operations.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Another job holds the output path.
    #[error("Output path is busy: {}", .path.display())]
    OutputPathBusy { path: PathBuf },

    /// A permit was presented for a different path than the registration.
    #[error("Permit for {} does not match output path {}", .permit.display(), .output.display())]
    PermitMismatch { permit: PathBuf, output: PathBuf },

    /// A job with this id is already registered.
    #[error("Job already registered: {id}")]
    DuplicateJob { id: String },

    /// Session id was empty.
    #[error("Play session id must not be empty")]
    InvalidSessionId,

    /// The registry no longer accepts jobs.
    #[error("Job registry is shutting down")]
    ShuttingDown,

    /// The encoder could not be started.
    #[error("Failed to launch encoder: {0}")]
    Launch(#[from] ProcessError),
}

impl TranscodeError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutputPathBusy { .. })
    }
}

/// Errors controlling an encoder process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process is already gone.
    #[error("Process has already exited")]
    AlreadyExited,

    /// Encoder binary not found.
    #[error("Encoder not found at path: {}", .program.display())]
    NotFound { program: PathBuf },

    /// The process could not be spawned.
    #[error("Failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process does not accept stop commands.
    #[error("Process stdin is not available")]
    StdinUnavailable,

    /// I/O error talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    pub fn is_already_exited(&self) -> bool {
        matches!(self, Self::AlreadyExited)
    }
}

/// A single file that could not be deleted.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

/// Errors deleting partial output.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// The output directory could not be listed.
    #[error("Failed to list {}: {source}", .dir.display())]
    ListFailed {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// One or more matching files could not be deleted.
    #[error(
        "Failed to delete {} file(s) for {}: {}",
        .failures.len(),
        .path.display(),
        describe_failures(.failures)
    )]
    DeleteFailed {
        path: PathBuf,
        failures: Vec<FileFailure>,
    },
}

impl CleanupError {
    /// Paths that failed in this attempt.
    pub fn failed_paths(&self) -> Vec<&PathBuf> {
        match self {
            Self::ListFailed { dir, .. } => vec![dir],
            Self::DeleteFailed { failures, .. } => failures.iter().map(|f| &f.path).collect(),
        }
    }
}

fn describe_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.path.display(), f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors closing an external live stream.
#[derive(Debug, Error)]
pub enum LiveStreamError {
    #[error("Live stream not found: {id}")]
    NotFound { id: String },

    #[error("Failed to close live stream {id}: {reason}")]
    CloseFailed { id: String, reason: String },
}

impl LiveStreamError {
    pub fn close_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CloseFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_error_aggregates() {
        let err = CleanupError::DeleteFailed {
            path: PathBuf::from("/out/seg"),
            failures: vec![FileFailure {
                path: PathBuf::from("/out/seg1.ts"),
                error: io::Error::from(io::ErrorKind::PermissionDenied),
            }],
        };

        let message = err.to_string();
        assert!(message.starts_with("Failed to delete 1 file(s) for /out/seg"));
        assert!(message.contains("/out/seg1.ts"));
        assert_eq!(err.failed_paths(), vec![&PathBuf::from("/out/seg1.ts")]);
    }

    #[test]
    fn test_retryable() {
        assert!(TranscodeError::OutputPathBusy {
            path: PathBuf::from("/out/a.mp4")
        }
        .is_retryable());
        assert!(!TranscodeError::InvalidSessionId.is_retryable());
        assert!(ProcessError::AlreadyExited.is_already_exited());
    }
}
