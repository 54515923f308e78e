//! Types for transcoding jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Kind of output a transcoding job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodingJobType {
    /// A single file delivered while it grows.
    Progressive,
    /// HLS segments plus playlist.
    Hls,
    /// DASH segments plus manifest.
    Dash,
}

impl TranscodingJobType {
    pub fn is_progressive(&self) -> bool {
        matches!(self, Self::Progressive)
    }

    /// Whether the output is a set of segment files.
    pub fn is_segmented(&self) -> bool {
        !self.is_progressive()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progressive => "progressive",
            Self::Hls => "hls",
            Self::Dash => "dash",
        }
    }
}

impl fmt::Display for TranscodingJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to register a job, minus the process itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRegistration {
    /// Job identifier. A UUID v4 unless overridden.
    pub id: String,
    pub play_session_id: Option<String>,
    pub live_stream_id: Option<String>,
    /// Client device, used for session telemetry and device-wide kills.
    pub device_id: Option<String>,
    pub output_path: PathBuf,
    pub job_type: TranscodingJobType,
    /// Output is a live recording rather than a library item.
    pub is_live_output: bool,
}

impl JobRegistration {
    pub fn new(output_path: impl Into<PathBuf>, job_type: TranscodingJobType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            play_session_id: None,
            live_stream_id: None,
            device_id: None,
            output_path: output_path.into(),
            job_type,
            is_live_output: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_play_session(mut self, play_session_id: impl Into<String>) -> Self {
        self.play_session_id = Some(play_session_id.into());
        self
    }

    pub fn with_live_stream(mut self, live_stream_id: impl Into<String>) -> Self {
        self.live_stream_id = Some(live_stream_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Marks the output as live.
    pub fn live_output(mut self) -> Self {
        self.is_live_output = true;
        self
    }
}

/// Latest telemetry reported for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscodingProgress {
    /// Transcoded position in the media, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framerate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_transcoded: Option<u64>,
    /// Output bitrate in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
}

impl TranscodingProgress {
    /// Overwrites fields that are set in `update`.
    pub fn merge(&mut self, update: &TranscodingProgress) {
        if update.position_ms.is_some() {
            self.position_ms = update.position_ms;
        }
        if update.framerate.is_some() {
            self.framerate = update.framerate;
        }
        if update.percent_complete.is_some() {
            self.percent_complete = update.percent_complete;
        }
        if update.bytes_transcoded.is_some() {
            self.bytes_transcoded = update.bytes_transcoded;
        }
        if update.bitrate.is_some() {
            self.bitrate = update.bitrate;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Keepalive timer state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepaliveState {
    /// No timer scheduled.
    Unarmed,
    /// Timer scheduled.
    Armed,
    /// A request is in flight; no timer.
    Suspended,
    /// Timer elapsed and is deciding.
    Fired,
    /// The job is being torn down.
    Terminating,
}

/// Why a job was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    KeepaliveExpired,
    Requested,
    FailedToStart,
    Shutdown,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepaliveExpired => "keepalive_expired",
            Self::Requested => "requested",
            Self::FailedToStart => "failed_to_start",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command line for an encoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    /// Encoder to run. `None` runs the launcher's configured encoder.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Pipe stdout back to the caller instead of discarding it.
    pub capture_stdout: bool,
    /// Duration of the input, used to compute completion percentage.
    pub media_duration: Option<Duration>,
}

impl TranscodeCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            ..Self::encoder()
        }
    }

    /// A command for the configured encoder.
    pub fn encoder() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            working_dir: None,
            capture_stdout: false,
            media_duration: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    pub fn with_media_duration(mut self, duration: Duration) -> Self {
        self.media_duration = Some(duration);
        self
    }
}

/// Point-in-time view of a job for listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub play_session_id: Option<String>,
    pub live_stream_id: Option<String>,
    pub device_id: Option<String>,
    pub output_path: PathBuf,
    pub job_type: TranscodingJobType,
    pub is_live_output: bool,
    pub pid: Option<u32>,
    pub active_request_count: u32,
    pub is_user_paused: bool,
    pub has_exited: bool,
    pub keepalive: KeepaliveState,
    pub ping_timeout_ms: u64,
    /// Milliseconds since the last ping.
    pub idle_ms: u64,
    pub created_at: DateTime<Utc>,
    pub progress: TranscodingProgress,
}
