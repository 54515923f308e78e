//! Job teardown.
//!
//! Teardown runs at most once per job. The first caller claims it and the
//! sequence below runs as a task on the registry's tracker, so dropping the
//! caller's future never abandons a half-stopped encoder. Everyone else waits
//! for that run to finish.
//!
//! 1. Cancel the keepalive timer, remove the job, release its path permit
//! 2. Cancel the job's token
//! 3. Stop the throttler and the process (graceful stop, then kill)
//! 4. Delete partial output with retries, if requested
//! 5. Close the live stream, if requested
//! 6. Clear session telemetry

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cleanup::{self, CleanupOutcome};
use super::job::TranscodingJob;
use super::registry::RegistryInner;
use super::types::{KeepaliveState, TerminationReason};
use crate::metrics;

/// What teardown should do beyond stopping the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownOptions {
    pub delete_files: bool,
    pub close_live_stream: bool,
}

impl TeardownOptions {
    /// Delete output and close the live stream.
    pub fn full() -> Self {
        Self {
            delete_files: true,
            close_live_stream: true,
        }
    }

    pub fn delete_files(delete_files: bool) -> Self {
        Self {
            delete_files,
            close_live_stream: false,
        }
    }
}

/// How the encoder process was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    /// The job had no process attached.
    NoProcess,
    /// The process was already gone.
    AlreadyExited,
    /// The process honored the stop command.
    Graceful,
    /// The process had to be killed.
    Forced,
    /// Killing the process failed.
    Failed,
}

impl StopMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProcess => "no_process",
            Self::AlreadyExited => "already_exited",
            Self::Graceful => "graceful",
            Self::Forced => "forced",
            Self::Failed => "failed",
        }
    }
}

/// Summary of a completed teardown.
#[derive(Debug)]
pub struct TeardownReport {
    pub job_id: String,
    pub reason: TerminationReason,
    pub stop: StopMethod,
    pub cleanup: CleanupOutcome,
    /// `None` when no close was attempted.
    pub live_stream_closed: Option<bool>,
}

/// Tears `job` down. Returns `None` if another caller already owns the teardown,
/// after that teardown has completed.
pub(crate) async fn terminate(
    registry: &Arc<RegistryInner>,
    job: &Arc<TranscodingJob>,
    reason: TerminationReason,
    options: TeardownOptions,
) -> Option<TeardownReport> {
    if !job.claim_teardown() {
        debug!(job_id = %job.id(), "Teardown already in progress, waiting");
        job.wait_terminated().await;
        return None;
    }

    // No await between the claim and the spawn.
    let task_registry = Arc::clone(registry);
    let task_job = Arc::clone(job);
    let handle = registry.tracker.spawn(async move {
        run_teardown(&task_registry, &task_job, reason, options).await
    });

    match handle.await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(job_id = %job.id(), error = %e, "Teardown task failed");
            // Release waiters.
            job.finish_teardown();
            None
        }
    }
}

async fn run_teardown(
    registry: &RegistryInner,
    job: &Arc<TranscodingJob>,
    reason: TerminationReason,
    options: TeardownOptions,
) -> TeardownReport {
    let started = std::time::Instant::now();
    {
        let mut state = job.state.lock();
        state.cancel_timer();
        state.keepalive = KeepaliveState::Terminating;
    }
    registry.remove(job);
    job.cancellation_token().cancel();

    info!(
        job_id = %job.id(),
        play_session_id = ?job.play_session_id(),
        path = %job.output_path().display(),
        reason = %reason,
        "Terminating transcoding job"
    );

    let stop = stop_process(job, registry).await;
    metrics::PROCESS_STOPS.with_label_values(&[stop.as_str()]).inc();

    let cleanup = if options.delete_files {
        cleanup::delete_partial_output(
            registry.collaborators.file_system.as_ref(),
            job.output_path(),
            job.job_type(),
            &registry.config.cleanup,
        )
        .await
    } else {
        CleanupOutcome::Skipped
    };

    let live_stream_closed = match job.live_stream_id() {
        Some(live_stream_id) if options.close_live_stream => {
            match registry
                .collaborators
                .live_streams
                .close_live_stream(live_stream_id)
                .await
            {
                Ok(()) => Some(true),
                Err(e) => {
                    error!(
                        job_id = %job.id(),
                        live_stream_id,
                        error = %e,
                        "Error closing live stream"
                    );
                    Some(false)
                }
            }
        }
        _ => None,
    };

    if let Some(device_id) = job.device_id() {
        registry
            .collaborators
            .session_reporter
            .clear_transcoding_info(device_id);
    }

    metrics::JOBS_TERMINATED
        .with_label_values(&[reason.as_str()])
        .inc();
    metrics::TEARDOWN_DURATION
        .with_label_values(&[reason.as_str()])
        .observe(started.elapsed().as_secs_f64());
    job.finish_teardown();

    info!(
        job_id = %job.id(),
        stop = stop.as_str(),
        cleanup_attempts = cleanup.attempts(),
        "Transcoding job terminated"
    );

    TeardownReport {
        job_id: job.id().to_string(),
        reason,
        stop,
        cleanup,
        live_stream_closed,
    }
}

async fn stop_process(job: &TranscodingJob, registry: &RegistryInner) -> StopMethod {
    let mut section = job.process.lock().await;

    if let Some(throttler) = section.throttler.take() {
        throttler.stop();
    }

    let Some(process) = section.process.as_mut() else {
        return StopMethod::NoProcess;
    };

    if job.has_exited() {
        return StopMethod::AlreadyExited;
    }

    info!(job_id = %job.id(), pid = ?process.pid(), "Stopping transcoding process");

    let grace = registry.config.graceful_stop_timeout();
    let method = match process.request_stop().await {
        Ok(()) => match process.wait_for_exit(grace).await {
            Ok(true) => Some(StopMethod::Graceful),
            Ok(false) => {
                info!(
                    job_id = %job.id(),
                    grace_ms = grace.as_millis() as u64,
                    "Process did not exit after stop command, killing"
                );
                None
            }
            Err(e) if e.is_already_exited() => Some(StopMethod::AlreadyExited),
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Error waiting for process exit, killing");
                None
            }
        },
        Err(e) if e.is_already_exited() => Some(StopMethod::AlreadyExited),
        Err(e) => {
            warn!(job_id = %job.id(), error = %e, "Failed to send stop command, killing");
            None
        }
    };

    let method = match method {
        Some(method) => method,
        None => match process.kill().await {
            Ok(()) => StopMethod::Forced,
            Err(e) if e.is_already_exited() => StopMethod::AlreadyExited,
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "Failed to kill transcoding process");
                StopMethod::Failed
            }
        },
    };

    if method != StopMethod::Failed {
        job.set_exited();
    }
    method
}
