//! A registered transcoding job.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::path_lock::PathPermit;
use super::traits::{Throttler, TranscodeProcess};
use super::types::{
    JobRegistration, JobSnapshot, KeepaliveState, TranscodingJobType, TranscodingProgress,
};

/// Request counting and keepalive state, guarded by the job mutex.
pub(crate) struct JobState {
    pub(crate) active_request_count: u32,
    pub(crate) is_user_paused: bool,
    pub(crate) last_ping: Instant,
    pub(crate) ping_timeout: Duration,
    pub(crate) keepalive: KeepaliveState,
    pub(crate) generation: u64,
    pub(crate) timer: Option<AbortHandle>,
}

impl JobState {
    /// Aborts the scheduled timer task, if any, and invalidates its generation.
    pub(crate) fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Process handle and throttler, held across the stop/wait/kill sequence.
pub(crate) struct ProcessSection {
    pub(crate) process: Option<Box<dyn TranscodeProcess>>,
    pub(crate) throttler: Option<Box<dyn Throttler>>,
}

/// One supervised encoder run.
///
/// Jobs are created by [`JobRegistry`](super::JobRegistry) and shared as
/// `Arc<TranscodingJob>`.
pub struct TranscodingJob {
    id: String,
    play_session_id: Option<String>,
    live_stream_id: Option<String>,
    device_id: Option<String>,
    output_path: PathBuf,
    job_type: TranscodingJobType,
    is_live_output: bool,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    has_exited: AtomicBool,
    teardown_claimed: AtomicBool,
    teardown_done: CancellationToken,
    pub(crate) state: Mutex<JobState>,
    progress: Mutex<TranscodingProgress>,
    pub(crate) process: tokio::sync::Mutex<ProcessSection>,
    permit: Mutex<Option<PathPermit>>,
}

impl TranscodingJob {
    pub(crate) fn new(
        registration: JobRegistration,
        process: Option<Box<dyn TranscodeProcess>>,
        permit: PathPermit,
        ping_timeout: Duration,
    ) -> Self {
        let pid = process.as_ref().and_then(|p| p.pid());
        Self {
            id: registration.id,
            play_session_id: registration.play_session_id,
            live_stream_id: registration.live_stream_id,
            device_id: registration.device_id,
            output_path: registration.output_path,
            job_type: registration.job_type,
            is_live_output: registration.is_live_output,
            pid,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            has_exited: AtomicBool::new(false),
            teardown_claimed: AtomicBool::new(false),
            teardown_done: CancellationToken::new(),
            state: Mutex::new(JobState {
                active_request_count: 0,
                is_user_paused: false,
                last_ping: Instant::now(),
                ping_timeout,
                keepalive: KeepaliveState::Unarmed,
                generation: 0,
                timer: None,
            }),
            progress: Mutex::new(TranscodingProgress::default()),
            process: tokio::sync::Mutex::new(ProcessSection {
                process,
                throttler: None,
            }),
            permit: Mutex::new(Some(permit)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn play_session_id(&self) -> Option<&str> {
        self.play_session_id.as_deref()
    }

    pub fn live_stream_id(&self) -> Option<&str> {
        self.live_stream_id.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn job_type(&self) -> TranscodingJobType {
        self.job_type
    }

    pub fn is_live_output(&self) -> bool {
        self.is_live_output
    }

    /// OS process id of the encoder, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Token cancelled when the job is torn down. Copies serving this job
    /// should run under it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the encoder process has been observed to exit.
    pub fn has_exited(&self) -> bool {
        self.has_exited.load(Ordering::Acquire)
    }

    pub(crate) fn set_exited(&self) -> bool {
        !self.has_exited.swap(true, Ordering::AcqRel)
    }

    pub fn active_request_count(&self) -> u32 {
        self.state.lock().active_request_count
    }

    pub fn is_user_paused(&self) -> bool {
        self.state.lock().is_user_paused
    }

    pub fn keepalive_state(&self) -> KeepaliveState {
        self.state.lock().keepalive
    }

    /// Bumped whenever the keepalive timer is replaced or cancelled.
    pub fn keepalive_generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn ping_timeout(&self) -> Duration {
        self.state.lock().ping_timeout
    }

    pub fn last_ping(&self) -> Instant {
        self.state.lock().last_ping
    }

    /// Latest telemetry.
    pub fn progress(&self) -> TranscodingProgress {
        self.progress.lock().clone()
    }

    pub(crate) fn update_progress(&self, update: &TranscodingProgress) -> TranscodingProgress {
        let mut progress = self.progress.lock();
        progress.merge(update);
        progress.clone()
    }

    /// Whether teardown has started.
    pub fn is_terminating(&self) -> bool {
        self.teardown_claimed.load(Ordering::Acquire)
    }

    /// Claims teardown. Only the first caller gets `true`.
    pub(crate) fn claim_teardown(&self) -> bool {
        self.teardown_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_teardown(&self) {
        self.teardown_done.cancel();
    }

    /// Resolves once teardown has fully completed.
    pub async fn wait_terminated(&self) {
        self.teardown_done.cancelled().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.teardown_done.is_cancelled()
    }

    /// Drops the path permit, letting the next job for this path start.
    pub(crate) fn release_permit(&self) {
        self.permit.lock().take();
    }

    pub fn holds_permit(&self) -> bool {
        self.permit.lock().is_some()
    }

    pub(crate) fn matches_session(&self, play_session_id: &str) -> bool {
        self.play_session_id
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(play_session_id))
    }

    pub(crate) fn matches_device(&self, device_id: &str) -> bool {
        self.device_id
            .as_deref()
            .is_some_and(|id| id.eq_ignore_ascii_case(device_id))
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (active_request_count, is_user_paused, keepalive, ping_timeout, idle) = {
            let state = self.state.lock();
            (
                state.active_request_count,
                state.is_user_paused,
                state.keepalive,
                state.ping_timeout,
                state.last_ping.elapsed(),
            )
        };

        JobSnapshot {
            id: self.id.clone(),
            play_session_id: self.play_session_id.clone(),
            live_stream_id: self.live_stream_id.clone(),
            device_id: self.device_id.clone(),
            output_path: self.output_path.clone(),
            job_type: self.job_type,
            is_live_output: self.is_live_output,
            pid: self.pid,
            active_request_count,
            is_user_paused,
            has_exited: self.has_exited(),
            keepalive,
            ping_timeout_ms: ping_timeout.as_millis() as u64,
            idle_ms: idle.as_millis() as u64,
            created_at: self.created_at,
            progress: self.progress(),
        }
    }
}

impl fmt::Debug for TranscodingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodingJob")
            .field("id", &self.id)
            .field("play_session_id", &self.play_session_id)
            .field("output_path", &self.output_path)
            .field("job_type", &self.job_type)
            .field("pid", &self.pid)
            .field("has_exited", &self.has_exited())
            .field("terminating", &self.is_terminating())
            .finish()
    }
}
