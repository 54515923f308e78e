//! Transcoding job supervision.
//!
//! The [`JobRegistry`] tracks every running encoder, keeps at most one job per
//! output path, and kills jobs that no client keeps alive.
//!
//! # Features
//!
//! - Per-path exclusion via [`PathLocks`]
//! - Request reference counting and session pings
//! - Keepalive timers (10s progressive, 60s segmented by default)
//! - Idempotent teardown: graceful stop, forced kill, output cleanup with retries
//! - FFmpeg launcher with progress parsing
//!
//! # Example
//!
//! ```ignore
//! use warden_core::transcode::{JobRegistration, JobRegistry, TranscodeCommand, TranscodingJobType};
//!
//! let registry = JobRegistry::from_config(&config, Collaborators::for_config(&config.transcoding));
//! registry.sweep_stale_output().await;
//!
//! let started = registry
//!     .start_transcode(
//!         JobRegistration::new("/transcodes/movie.mp4", TranscodingJobType::Progressive)
//!             .with_play_session("ps-1")
//!             .with_device("living-room"),
//!         TranscodeCommand::encoder().args(["-i", "movie.mkv", "/transcodes/movie.mp4"]),
//!     )
//!     .await?;
//!
//! let mut output = tokio::fs::File::open("/transcodes/movie.mp4").await?;
//! registry
//!     .stream_output(&started.job, &mut output, &mut response, CopyOptions::new().tail_until_cancelled())
//!     .await?;
//! ```

mod cleanup;
mod config;
mod error;
mod fs;
mod job;
mod keepalive;
mod path_lock;
mod process;
mod registry;
mod terminator;
mod traits;
mod types;

pub use cleanup::{delete_output, delete_partial_output, sweep_directory, CleanupOutcome};
pub use config::{CleanupConfig, TranscodingConfig};
pub use error::{CleanupError, FileFailure, LiveStreamError, ProcessError, TranscodeError};
pub use fs::LocalFileSystem;
pub use job::TranscodingJob;
pub use path_lock::{PathLocks, PathPermit};
pub use process::{FfmpegLauncher, FfmpegProcess, ProgressParser};
pub use registry::{ActiveRequest, Collaborators, JobRegistry, StartedTranscode};
pub use terminator::{StopMethod, TeardownOptions, TeardownReport};
pub use traits::{
    DeleteOutcome, FileSystem, LaunchedProcess, LiveStreamCloser, NoopLiveStreamCloser,
    NoopSessionReporter, OutputReader, ProcessLauncher, SessionReporter, Throttler,
    TranscodeProcess,
};
pub use types::{
    JobRegistration, JobSnapshot, KeepaliveState, TerminationReason, TranscodeCommand,
    TranscodingJobType, TranscodingProgress,
};
