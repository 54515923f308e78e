//! FFmpeg process adapter.
//!
//! [`FfmpegLauncher`] spawns encoder processes with stdin piped so they can be
//! asked to stop with `q`, and stderr piped for progress parsing.

use async_trait::async_trait;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::error::ProcessError;
use super::job::TranscodingJob;
use super::registry::RegistryInner;
use super::traits::{LaunchedProcess, OutputReader, ProcessLauncher, TranscodeProcess};
use super::types::{TranscodeCommand, TranscodingProgress};

/// Minimum interval between progress reports for one job.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Launches ffmpeg (or any compatible encoder) with `tokio::process`.
///
/// Commands that name no program run the launcher's configured encoder.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The encoder used for commands without an explicit program.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn launch(&self, command: &TranscodeCommand) -> Result<LaunchedProcess, ProcessError> {
        let program = command.program.as_deref().unwrap_or(self.program.as_path());
        let mut cmd = Command::new(program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(if command.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.to_path_buf(),
                }
            } else {
                ProcessError::Spawn {
                    program: program.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputReader);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputReader);
        let process = FfmpegProcess::new(child);

        info!(
            pid = ?process.pid(),
            program = %program.display(),
            "Launched transcoding process"
        );

        Ok(LaunchedProcess {
            process: Box::new(process),
            stdout,
            stderr,
        })
    }
}

/// A spawned encoder process.
#[derive(Debug)]
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
}

impl FfmpegProcess {
    pub fn new(mut child: Child) -> Self {
        let stdin = child.stdin.take();
        let pid = child.id();
        Self { child, stdin, pid }
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn request_stop(&mut self) -> Result<(), ProcessError> {
        if self.has_exited() {
            return Err(ProcessError::AlreadyExited);
        }
        let stdin = self.stdin.as_mut().ok_or(ProcessError::StdinUnavailable)?;

        let result = async {
            stdin.write_all(b"q").await?;
            stdin.flush().await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(_) if self.has_exited() => Err(ProcessError::AlreadyExited),
            Err(e) => Err(ProcessError::Io(e)),
        }
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, ProcessError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = ?self.pid, ?status, "Transcoding process exited");
                Ok(true)
            }
            Ok(Err(e)) => Err(ProcessError::Io(e)),
            Err(_) => Ok(false),
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                Err(ProcessError::AlreadyExited)
            }
            Err(e) => Err(ProcessError::Io(e)),
        }
    }
}

/// Parses ffmpeg progress output.
///
/// Understands both `-progress` key/value lines and the classic stats line
/// (`frame= 100 fps= 25 ... time=00:00:04.00 bitrate= 512.0kbits/s`).
#[derive(Debug)]
pub struct ProgressParser {
    fps: Option<Regex>,
    bitrate: Option<Regex>,
    total_size: Option<Regex>,
    size_kb: Option<Regex>,
    out_time_us: Option<Regex>,
    time: Option<Regex>,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            fps: Regex::new(r"(?:^|\s)fps=\s*(\d+(?:\.\d+)?)").ok(),
            bitrate: Regex::new(r"bitrate=\s*(\d+(?:\.\d+)?)kbits/s").ok(),
            total_size: Regex::new(r"^total_size=(\d+)").ok(),
            size_kb: Regex::new(r"(?:^|\s)L?size=\s*(\d+)(?:kB|KiB)").ok(),
            out_time_us: Regex::new(r"^out_time_(?:us|ms)=(\d+)").ok(),
            time: Regex::new(r"(?:^|\s)(?:out_)?time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").ok(),
        }
    }

    /// Extracts whatever progress fields `line` carries.
    ///
    /// `media_duration` enables the completion percentage.
    pub fn parse(
        &self,
        line: &str,
        media_duration: Option<Duration>,
    ) -> Option<TranscodingProgress> {
        let line = line.trim();
        let mut progress = TranscodingProgress::default();

        if let Some(fps) = capture(&self.fps, line, 1).and_then(|v| v.parse::<f32>().ok()) {
            progress.framerate = Some(fps);
        }

        if let Some(kbps) = capture(&self.bitrate, line, 1).and_then(|v| v.parse::<f64>().ok()) {
            progress.bitrate = Some((kbps * 1000.0) as u32);
        }

        if let Some(bytes) = capture(&self.total_size, line, 1).and_then(|v| v.parse().ok()) {
            progress.bytes_transcoded = Some(bytes);
        } else if let Some(kb) = capture(&self.size_kb, line, 1).and_then(|v| v.parse::<u64>().ok())
        {
            progress.bytes_transcoded = Some(kb * 1024);
        }

        if let Some(us) = capture(&self.out_time_us, line, 1).and_then(|v| v.parse::<u64>().ok()) {
            progress.position_ms = Some(us / 1000);
        } else if let Some(position) = self.parse_time(line) {
            progress.position_ms = Some(position.as_millis() as u64);
        }

        if let (Some(position_ms), Some(duration)) = (progress.position_ms, media_duration) {
            let total_ms = duration.as_millis() as f64;
            if total_ms > 0.0 {
                progress.percent_complete =
                    Some((position_ms as f64 / total_ms * 100.0).min(100.0));
            }
        }

        if progress.is_empty() {
            None
        } else {
            Some(progress)
        }
    }

    fn parse_time(&self, line: &str) -> Option<Duration> {
        let caps = self.time.as_ref()?.captures(line)?;
        let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
        let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
        let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
        Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
    }
}

fn capture<'a>(regex: &Option<Regex>, line: &'a str, group: usize) -> Option<&'a str> {
    regex
        .as_ref()?
        .captures(line)?
        .get(group)
        .map(|m| m.as_str())
}

/// Reads encoder diagnostics until EOF, forwarding parsed progress.
///
/// Reports are throttled to one per [`PROGRESS_INTERVAL`]. EOF means the
/// process closed its stderr, which is taken as exit.
pub(crate) async fn monitor_progress(
    registry: Weak<RegistryInner>,
    job: Arc<TranscodingJob>,
    stderr: OutputReader,
    media_duration: Option<Duration>,
) {
    let parser = ProgressParser::new();
    let cancel = job.cancellation_token();
    let mut lines = BufReader::new(stderr).lines();
    let mut pending = TranscodingProgress::default();
    let mut last_report: Option<Instant> = None;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Error reading encoder output");
                break;
            }
        };

        trace!(job_id = %job.id(), line = %line, "Encoder output");

        let Some(update) = parser.parse(&line, media_duration) else {
            continue;
        };
        pending.merge(&update);

        if last_report.is_some_and(|at| at.elapsed() < PROGRESS_INTERVAL) {
            continue;
        }
        let Some(registry) = registry.upgrade() else {
            return;
        };
        registry.report_progress(&job, &pending);
        pending = TranscodingProgress::default();
        last_report = Some(Instant::now());
    }

    if let Some(registry) = registry.upgrade() {
        if !pending.is_empty() {
            registry.report_progress(&job, &pending);
        }
        registry.mark_exited(&job);
    }
}
