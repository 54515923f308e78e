//! Configuration for transcoding job supervision.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::types::TranscodingJobType;

/// Configuration for the job registry and its keepalive/teardown behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscodingConfig {
    /// Directory encoder output is written to. Swept on startup.
    #[serde(default = "default_transcode_dir")]
    pub transcode_dir: PathBuf,

    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Keepalive timeout for progressive jobs (milliseconds).
    #[serde(default = "default_progressive_ping_timeout")]
    pub progressive_ping_timeout_ms: u64,

    /// Keepalive timeout for HLS/DASH jobs (milliseconds).
    #[serde(default = "default_segmented_ping_timeout")]
    pub segmented_ping_timeout_ms: u64,

    /// How long a process gets to exit after the graceful stop command (milliseconds).
    #[serde(default = "default_graceful_stop_timeout")]
    pub graceful_stop_timeout_ms: u64,

    /// Delete leftover output in `transcode_dir` at startup.
    #[serde(default = "default_true")]
    pub sweep_on_startup: bool,

    /// Partial output deletion retries.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Retry policy for deleting partial output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Maximum deletion attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first attempt (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Delay before each later attempt (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_transcode_dir() -> PathBuf {
    std::env::temp_dir().join("warden-transcodes")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_progressive_ping_timeout() -> u64 {
    10_000
}

fn default_segmented_ping_timeout() -> u64 {
    60_000
}

fn default_graceful_stop_timeout() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> u64 {
    1_500
}

fn default_retry_delay() -> u64 {
    500
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            transcode_dir: default_transcode_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            progressive_ping_timeout_ms: default_progressive_ping_timeout(),
            segmented_ping_timeout_ms: default_segmented_ping_timeout(),
            graceful_stop_timeout_ms: default_graceful_stop_timeout(),
            sweep_on_startup: default_true(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl TranscodingConfig {
    /// Sets the transcode directory.
    pub fn with_transcode_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcode_dir = dir.into();
        self
    }

    /// Sets the ffmpeg binary path.
    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Sets the cleanup retry policy.
    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Keepalive timeout for a job of the given type.
    pub fn ping_timeout_for(&self, job_type: TranscodingJobType) -> Duration {
        if job_type.is_progressive() {
            Duration::from_millis(self.progressive_ping_timeout_ms)
        } else {
            Duration::from_millis(self.segmented_ping_timeout_ms)
        }
    }

    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_timeout_ms)
    }
}

impl CleanupConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.initial_delay()
        } else {
            self.retry_delay()
        }
    }
}
