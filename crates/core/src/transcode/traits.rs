//! Trait definitions for the collaborators the registry drives.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncRead;

use super::error::{LiveStreamError, ProcessError};
use super::types::{TranscodeCommand, TranscodingProgress};

/// Boxed reader for process output pipes.
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// A running encoder process.
#[async_trait]
pub trait TranscodeProcess: Send {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Asks the process to finish on its own.
    async fn request_stop(&mut self) -> Result<(), ProcessError>;

    /// Waits up to `timeout` for the process to exit. Returns whether it did.
    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, ProcessError>;

    /// Forcefully terminates the process.
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

/// A launched process plus whatever output pipes were captured.
pub struct LaunchedProcess {
    pub process: Box<dyn TranscodeProcess>,
    /// Encoder output, when the command asked for it.
    pub stdout: Option<OutputReader>,
    /// Diagnostic/progress output.
    pub stderr: Option<OutputReader>,
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.process.pid())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Starts encoder processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, command: &TranscodeCommand) -> Result<LaunchedProcess, ProcessError>;
}

/// Receives per-device transcoding telemetry.
pub trait SessionReporter: Send + Sync {
    fn report_transcoding_info(&self, device_id: &str, job_id: &str, progress: &TranscodingProgress);

    fn clear_transcoding_info(&self, device_id: &str);
}

/// Closes externally managed live streams.
#[async_trait]
pub trait LiveStreamCloser: Send + Sync {
    async fn close_live_stream(&self, live_stream_id: &str) -> Result<(), LiveStreamError>;
}

/// Bandwidth throttler attached to a job's process.
pub trait Throttler: Send + Sync {
    fn stop(&self);
}

/// Result of deleting one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// File operations used for output cleanup.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Deletes a file. A missing file is `Ok(DeleteOutcome::NotFound)`.
    async fn delete_file(&self, path: &Path) -> io::Result<DeleteOutcome>;

    /// Lists regular files in `dir`.
    async fn list_files(&self, dir: &Path, recursive: bool) -> io::Result<Vec<PathBuf>>;
}

/// Session reporter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionReporter;

impl SessionReporter for NoopSessionReporter {
    fn report_transcoding_info(&self, _: &str, _: &str, _: &TranscodingProgress) {}

    fn clear_transcoding_info(&self, _: &str) {}
}

/// Live stream closer for deployments without live TV.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLiveStreamCloser;

#[async_trait]
impl LiveStreamCloser for NoopLiveStreamCloser {
    async fn close_live_stream(&self, _: &str) -> Result<(), LiveStreamError> {
        Ok(())
    }
}
