//! Registry of active transcoding jobs.

use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::cleanup;
use super::config::TranscodingConfig;
use super::error::TranscodeError;
use super::fs::LocalFileSystem;
use super::job::TranscodingJob;
use super::keepalive;
use super::path_lock::{PathLocks, PathPermit};
use super::process::{self, FfmpegLauncher};
use super::terminator::{self, TeardownOptions, TeardownReport};
use super::traits::{
    FileSystem, LiveStreamCloser, NoopLiveStreamCloser, NoopSessionReporter, OutputReader,
    ProcessLauncher, SessionReporter, Throttler, TranscodeProcess,
};
use super::types::{
    JobRegistration, JobSnapshot, TerminationReason, TranscodeCommand, TranscodingJobType,
    TranscodingProgress,
};
use crate::config::Config;
use crate::copy::{CopyError, CopyOptions, CopyOutcome, StreamCopier};
use crate::metrics;

/// External services the registry talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub file_system: Arc<dyn FileSystem>,
    pub session_reporter: Arc<dyn SessionReporter>,
    pub live_streams: Arc<dyn LiveStreamCloser>,
    pub launcher: Arc<dyn ProcessLauncher>,
}

impl Collaborators {
    /// Local filesystem and ffmpeg, no session reporting or live streams.
    pub fn local() -> Self {
        Self {
            file_system: Arc::new(LocalFileSystem::new()),
            session_reporter: Arc::new(NoopSessionReporter),
            live_streams: Arc::new(NoopLiveStreamCloser),
            launcher: Arc::new(FfmpegLauncher::default()),
        }
    }

    /// [`local`](Self::local) collaborators running the configured encoder.
    pub fn for_config(config: &TranscodingConfig) -> Self {
        Self::local().with_launcher(Arc::new(FfmpegLauncher::new(config.ffmpeg_path.clone())))
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_session_reporter(mut self, reporter: Arc<dyn SessionReporter>) -> Self {
        self.session_reporter = reporter;
        self
    }

    pub fn with_live_streams(mut self, live_streams: Arc<dyn LiveStreamCloser>) -> Self {
        self.live_streams = live_streams;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// A transcode started through [`JobRegistry::start_transcode`].
pub struct StartedTranscode {
    pub job: Arc<TranscodingJob>,
    /// Encoder stdout, when the command captured it.
    pub stdout: Option<OutputReader>,
}

impl fmt::Debug for StartedTranscode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartedTranscode")
            .field("job", &self.job)
            .field("stdout", &self.stdout.is_some())
            .finish()
    }
}

pub(crate) struct RegistryInner {
    pub(crate) config: TranscodingConfig,
    pub(crate) collaborators: Collaborators,
    pub(crate) tracker: TaskTracker,
    copier: StreamCopier,
    jobs: Mutex<Vec<Arc<TranscodingJob>>>,
    path_locks: PathLocks,
    shutting_down: AtomicBool,
}

impl RegistryInner {
    /// Removes `job` and releases its path permit. Returns whether it was listed.
    pub(crate) fn remove(&self, job: &Arc<TranscodingJob>) -> bool {
        let removed = {
            let mut jobs = self.jobs.lock();
            let before = jobs.len();
            jobs.retain(|j| !Arc::ptr_eq(j, job));
            metrics::ACTIVE_JOBS.set(jobs.len() as i64);
            jobs.len() != before
        };
        job.release_permit();
        removed
    }

    pub(crate) fn report_progress(&self, job: &TranscodingJob, update: &TranscodingProgress) {
        let progress = job.update_progress(update);
        if let Some(device_id) = job.device_id() {
            self.collaborators
                .session_reporter
                .report_transcoding_info(device_id, job.id(), &progress);
        }
    }

    pub(crate) fn mark_exited(&self, job: &TranscodingJob) {
        if job.set_exited() {
            info!(job_id = %job.id(), "Transcoding process exited");
        }
    }
}

/// Tracks active transcoding jobs and supervises their lifetime.
///
/// The registry is a cheap handle; clones share state. It must be used from
/// within a Tokio runtime, since keepalive timers run as tasks.
///
/// # Example
///
/// ```ignore
/// use warden_core::transcode::{JobRegistry, JobRegistration, TranscodingJobType};
///
/// let registry = JobRegistry::new(config.transcoding.clone());
/// let started = registry
///     .start_transcode(
///         JobRegistration::new("/transcodes/abc.m3u8", TranscodingJobType::Hls)
///             .with_play_session("ps-1"),
///         command,
///     )
///     .await?;
///
/// registry.ping("ps-1", None)?;
/// // ...
/// registry.shutdown().await;
/// ```
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    /// Creates a registry with local collaborators.
    pub fn new(config: TranscodingConfig) -> Self {
        let collaborators = Collaborators::for_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: TranscodingConfig, collaborators: Collaborators) -> Self {
        Self::build(config, collaborators, StreamCopier::with_defaults())
    }

    /// Creates a registry from the full application config, copying output
    /// with the `[streaming]` settings.
    pub fn from_config(config: &Config, collaborators: Collaborators) -> Self {
        Self::build(
            config.transcoding.clone(),
            collaborators,
            StreamCopier::new(config.streaming.clone()),
        )
    }

    fn build(
        config: TranscodingConfig,
        collaborators: Collaborators,
        copier: StreamCopier,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                collaborators,
                tracker: TaskTracker::new(),
                copier,
                jobs: Mutex::new(Vec::new()),
                path_locks: PathLocks::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &TranscodingConfig {
        &self.inner.config
    }

    pub fn path_locks(&self) -> &PathLocks {
        &self.inner.path_locks
    }

    pub fn copier(&self) -> &StreamCopier {
        &self.inner.copier
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    fn ensure_accepting(&self) -> Result<(), TranscodeError> {
        if self.is_shutting_down() {
            Err(TranscodeError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Waits for exclusive use of `path`. Take this before spawning an encoder.
    pub async fn acquire_output_path(&self, path: impl AsRef<Path>) -> PathPermit {
        self.inner.path_locks.acquire(path).await
    }

    /// Acquires the output path, then registers the job.
    pub async fn register(
        &self,
        registration: JobRegistration,
        process: Box<dyn TranscodeProcess>,
    ) -> Result<Arc<TranscodingJob>, TranscodeError> {
        self.ensure_accepting()?;
        let permit = self.acquire_output_path(&registration.output_path).await;
        self.register_with_permit(registration, process, permit)
    }

    /// Registers the job if its output path is free.
    pub fn try_register(
        &self,
        registration: JobRegistration,
        process: Box<dyn TranscodeProcess>,
    ) -> Result<Arc<TranscodingJob>, TranscodeError> {
        self.ensure_accepting()?;
        let permit = self
            .inner
            .path_locks
            .try_acquire(&registration.output_path)
            .ok_or_else(|| TranscodeError::OutputPathBusy {
                path: registration.output_path.clone(),
            })?;
        self.register_with_permit(registration, process, permit)
    }

    /// Registers a job using a permit obtained earlier for the same path.
    pub fn register_with_permit(
        &self,
        registration: JobRegistration,
        process: Box<dyn TranscodeProcess>,
        permit: PathPermit,
    ) -> Result<Arc<TranscodingJob>, TranscodeError> {
        self.insert(registration, Some(process), permit)
    }

    fn insert(
        &self,
        registration: JobRegistration,
        process: Option<Box<dyn TranscodeProcess>>,
        permit: PathPermit,
    ) -> Result<Arc<TranscodingJob>, TranscodeError> {
        if permit.path() != registration.output_path {
            return Err(TranscodeError::PermitMismatch {
                permit: permit.path().to_path_buf(),
                output: registration.output_path,
            });
        }

        let ping_timeout = self.inner.config.ping_timeout_for(registration.job_type);
        let job = Arc::new(TranscodingJob::new(registration, process, permit, ping_timeout));

        {
            let mut jobs = self.inner.jobs.lock();
            // Checked under the list lock so shutdown cannot miss this job.
            if self.is_shutting_down() {
                return Err(TranscodeError::ShuttingDown);
            }
            if jobs.iter().any(|j| j.id() == job.id()) {
                return Err(TranscodeError::DuplicateJob {
                    id: job.id().to_string(),
                });
            }
            jobs.push(Arc::clone(&job));
            metrics::ACTIVE_JOBS.set(jobs.len() as i64);
        }

        {
            let mut state = job.state.lock();
            keepalive::ping(&self.inner, &job, &mut state, false);
        }

        metrics::JOBS_REGISTERED
            .with_label_values(&[job.job_type().as_str()])
            .inc();
        info!(
            job_id = %job.id(),
            play_session_id = ?job.play_session_id(),
            path = %job.output_path().display(),
            job_type = %job.job_type(),
            pid = ?job.pid(),
            "Registered transcoding job"
        );

        self.inner
            .report_progress(&job, &TranscodingProgress::default());

        Ok(job)
    }

    /// Acquires the output path, launches the encoder and registers the job.
    ///
    /// If the encoder writes diagnostics to stderr, a monitor task parses them
    /// into progress reports and marks the job exited when the stream closes.
    pub async fn start_transcode(
        &self,
        registration: JobRegistration,
        command: TranscodeCommand,
    ) -> Result<StartedTranscode, TranscodeError> {
        self.ensure_accepting()?;
        let permit = self.acquire_output_path(&registration.output_path).await;

        let launched = match self.inner.collaborators.launcher.launch(&command).await {
            Ok(launched) => launched,
            Err(e) => {
                warn!(
                    path = %registration.output_path.display(),
                    error = %e,
                    "Failed to launch transcoding process"
                );
                if let Some(device_id) = &registration.device_id {
                    self.inner
                        .collaborators
                        .session_reporter
                        .clear_transcoding_info(device_id);
                }
                return Err(e.into());
            }
        };

        let job = self.insert(registration, Some(launched.process), permit)?;

        if let Some(stderr) = launched.stderr {
            self.inner.tracker.spawn(process::monitor_progress(
                Arc::downgrade(&self.inner),
                Arc::clone(&job),
                stderr,
                command.media_duration,
            ));
        }

        Ok(StartedTranscode {
            job,
            stdout: launched.stdout,
        })
    }

    /// All registered jobs.
    pub fn jobs(&self) -> Vec<Arc<TranscodingJob>> {
        self.inner.jobs.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs().iter().map(|job| job.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<TranscodingJob>> {
        self.inner
            .jobs
            .lock()
            .iter()
            .find(|job| job.id() == id)
            .cloned()
    }

    pub fn find_by_path_and_type(
        &self,
        path: impl AsRef<Path>,
        job_type: TranscodingJobType,
    ) -> Option<Arc<TranscodingJob>> {
        let path = path.as_ref();
        self.inner
            .jobs
            .lock()
            .iter()
            .find(|job| job.job_type() == job_type && job.output_path() == path)
            .cloned()
    }

    /// First job in the given play session (case-insensitive).
    pub fn find_by_session_id(&self, play_session_id: &str) -> Option<Arc<TranscodingJob>> {
        self.inner
            .jobs
            .lock()
            .iter()
            .find(|job| job.matches_session(play_session_id))
            .cloned()
    }

    pub fn has_active_job(&self, path: impl AsRef<Path>, job_type: TranscodingJobType) -> bool {
        self.find_by_path_and_type(path, job_type).is_some()
    }

    /// Marks a request against `job` as in flight, suspending its keepalive.
    pub fn begin_request(&self, job: &Arc<TranscodingJob>) {
        let mut state = job.state.lock();
        state.active_request_count += 1;
        keepalive::suspend(job, &mut state);
        debug!(
            job_id = %job.id(),
            active_requests = state.active_request_count,
            "Request started"
        );
    }

    /// [`begin_request`](Self::begin_request) for the job writing `path`.
    pub fn begin_request_for_path(
        &self,
        path: impl AsRef<Path>,
        job_type: TranscodingJobType,
    ) -> Option<Arc<TranscodingJob>> {
        let job = self.find_by_path_and_type(path, job_type)?;
        self.begin_request(&job);
        Some(job)
    }

    /// Marks a request as finished. The last one out re-arms the keepalive.
    pub fn end_request(&self, job: &Arc<TranscodingJob>) {
        let mut state = job.state.lock();
        if state.active_request_count == 0 {
            warn!(job_id = %job.id(), "Request ended with no active requests");
            return;
        }

        state.active_request_count -= 1;
        debug!(
            job_id = %job.id(),
            active_requests = state.active_request_count,
            "Request ended"
        );
        if state.active_request_count == 0 {
            keepalive::ping(&self.inner, job, &mut state, false);
        }
    }

    /// Marks a request as in flight until the returned guard is dropped.
    pub fn request_guard(&self, job: &Arc<TranscodingJob>) -> ActiveRequest {
        self.begin_request(job);
        ActiveRequest {
            registry: self.clone(),
            job: Arc::clone(job),
        }
    }

    /// Serves a job's output to one client.
    ///
    /// The job counts as requested for the duration of the copy, and the copy
    /// ends with [`CopyStop::Cancelled`](crate::copy::CopyStop::Cancelled) when
    /// the job is torn down. Dropping the future also ends the request.
    pub async fn stream_output<R, W>(
        &self,
        job: &Arc<TranscodingJob>,
        source: &mut R,
        destination: &mut W,
        options: CopyOptions,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let _request = self.request_guard(job);
        let cancel = job.cancellation_token();
        self.inner
            .copier
            .copy(source, destination, &cancel, options)
            .await
    }

    /// Keeps every job in the play session alive.
    ///
    /// Returns the number of jobs pinged.
    pub fn ping(
        &self,
        play_session_id: &str,
        is_user_paused: Option<bool>,
    ) -> Result<usize, TranscodeError> {
        if play_session_id.trim().is_empty() {
            return Err(TranscodeError::InvalidSessionId);
        }

        let jobs: Vec<_> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|job| job.matches_session(play_session_id))
            .cloned()
            .collect();

        for job in &jobs {
            let mut state = job.state.lock();
            if let Some(paused) = is_user_paused {
                state.is_user_paused = paused;
            }
            keepalive::ping(&self.inner, job, &mut state, true);
        }

        debug!(play_session_id, jobs = jobs.len(), "Ping");
        Ok(jobs.len())
    }

    /// Records new telemetry and forwards it to the session reporter.
    pub fn report_progress(&self, job: &TranscodingJob, progress: &TranscodingProgress) {
        self.inner.report_progress(job, progress);
    }

    /// Records that the encoder process has exited.
    pub fn mark_exited(&self, job: &TranscodingJob) {
        self.inner.mark_exited(job);
    }

    /// Attaches a throttler, stopped during teardown.
    pub async fn attach_throttler(&self, job: &TranscodingJob, throttler: Box<dyn Throttler>) {
        let mut section = job.process.lock().await;
        section.throttler = Some(throttler);
    }

    /// Tears down a single job.
    ///
    /// Returns `None` when the job was already being torn down elsewhere; the
    /// call still waits for that teardown to finish.
    pub async fn kill_job(
        &self,
        job: &Arc<TranscodingJob>,
        options: TeardownOptions,
    ) -> Option<TeardownReport> {
        terminator::terminate(&self.inner, job, TerminationReason::Requested, options).await
    }

    /// Tears down every job matching `predicate`, concurrently.
    ///
    /// Output is deleted for jobs whose path satisfies `delete_files`. Live
    /// streams are left open.
    pub async fn kill_jobs<P, D>(&self, predicate: P, delete_files: D) -> Vec<TeardownReport>
    where
        P: Fn(&TranscodingJob) -> bool,
        D: Fn(&Path) -> bool,
    {
        self.kill_matching(predicate, delete_files, TerminationReason::Requested)
            .await
    }

    /// Tears down the jobs of a play session, or of a device when no session
    /// is given.
    pub async fn kill_session_jobs(
        &self,
        device_id: &str,
        play_session_id: Option<&str>,
        delete_files: bool,
    ) -> Vec<TeardownReport> {
        match play_session_id.filter(|id| !id.is_empty()) {
            Some(session) => {
                self.kill_jobs(|job| job.matches_session(session), |_| delete_files)
                    .await
            }
            None => {
                self.kill_jobs(|job| job.matches_device(device_id), |_| delete_files)
                    .await
            }
        }
    }

    async fn kill_matching<P, D>(
        &self,
        predicate: P,
        delete_files: D,
        reason: TerminationReason,
    ) -> Vec<TeardownReport>
    where
        P: Fn(&TranscodingJob) -> bool,
        D: Fn(&Path) -> bool,
    {
        let matching: Vec<_> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|job| predicate(job))
            .cloned()
            .collect();

        if matching.is_empty() {
            return Vec::new();
        }

        info!(count = matching.len(), reason = %reason, "Killing transcoding jobs");

        let teardowns = matching.iter().map(|job| {
            let options = TeardownOptions::delete_files(delete_files(job.output_path()));
            terminator::terminate(&self.inner, job, reason, options)
        });

        join_all(teardowns).await.into_iter().flatten().collect()
    }

    /// Forgets a job whose encoder never started.
    ///
    /// No process control happens. The path permit is released and the
    /// device's session telemetry cleared. Returns whether a job was found.
    pub fn on_transcode_failed_to_start(
        &self,
        path: impl AsRef<Path>,
        job_type: TranscodingJobType,
        device_id: Option<&str>,
    ) -> bool {
        let job = self.find_by_path_and_type(path.as_ref(), job_type);

        if let Some(job) = &job {
            if job.claim_teardown() {
                job.state.lock().cancel_timer();
                self.inner.remove(job);
                job.cancellation_token().cancel();
                job.finish_teardown();
                metrics::JOBS_TERMINATED
                    .with_label_values(&[TerminationReason::FailedToStart.as_str()])
                    .inc();
                info!(
                    job_id = %job.id(),
                    path = %job.output_path().display(),
                    "Removed transcoding job that failed to start"
                );
            }
        }

        if let Some(device_id) = device_id {
            self.inner
                .collaborators
                .session_reporter
                .clear_transcoding_info(device_id);
        }

        job.is_some()
    }

    /// Deletes everything under the transcode directory.
    pub async fn sweep_stale_output(&self) -> usize {
        cleanup::sweep_directory(
            self.inner.collaborators.file_system.as_ref(),
            &self.inner.config.transcode_dir,
        )
        .await
    }

    /// Stops accepting jobs, tears down every job and waits for all
    /// background work, including keepalive-triggered teardowns.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("Registry shutdown already requested");
        }
        info!(jobs = self.len(), "Shutting down transcoding job registry");

        self.inner.tracker.close();
        self.kill_matching(|_| true, |_| true, TerminationReason::Shutdown)
            .await;
        self.inner.tracker.wait().await;

        info!("Transcoding job registry shut down");
    }
}

/// An in-flight request against a job. Dropping it ends the request, which
/// must happen inside a Tokio runtime.
#[must_use = "the request ends when the guard is dropped"]
pub struct ActiveRequest {
    registry: JobRegistry,
    job: Arc<TranscodingJob>,
}

impl ActiveRequest {
    pub fn job(&self) -> &Arc<TranscodingJob> {
        &self.job
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.registry.end_request(&self.job);
    }
}

impl fmt::Debug for ActiveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRequest")
            .field("job_id", &self.job.id())
            .finish()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
