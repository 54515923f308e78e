//! Per-job keepalive timer.
//!
//! All scheduling happens under the job's state mutex. Arming bumps the
//! generation counter and aborts the previous timer task; a timer task that
//! wakes up re-checks its generation under the same lock before acting.
//!
//! A ping for a job whose encoder already exited stops the timer instead of
//! re-arming it. Such a job stays registered until it is killed explicitly.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::job::{JobState, TranscodingJob};
use super::registry::RegistryInner;
use super::terminator::{self, TeardownOptions};
use super::types::{KeepaliveState, TerminationReason};

/// Schedules the timer to fire after `delay`, replacing any pending one.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn arm(
    registry: &Arc<RegistryInner>,
    job: &Arc<TranscodingJob>,
    state: &mut JobState,
    delay: Duration,
) {
    if state.keepalive == KeepaliveState::Terminating {
        return;
    }

    state.cancel_timer();
    let generation = state.generation;
    let weak = Arc::downgrade(registry);
    let task_job = Arc::clone(job);

    let handle = registry.tracker.spawn(async move {
        tokio::time::sleep(delay).await;
        fire(weak, task_job, generation).await;
    });

    state.timer = Some(handle.abort_handle());
    state.keepalive = KeepaliveState::Armed;
    debug!(
        job_id = %job.id(),
        delay_ms = delay.as_millis() as u64,
        generation,
        "Keepalive armed"
    );
}

/// Cancels the timer while a request is in flight.
pub(crate) fn suspend(job: &TranscodingJob, state: &mut JobState) {
    if state.keepalive == KeepaliveState::Terminating {
        return;
    }
    state.cancel_timer();
    state.keepalive = KeepaliveState::Suspended;
    debug!(job_id = %job.id(), "Keepalive suspended");
}

/// Records a ping and re-arms.
///
/// Progress check-ins on progressive jobs only move a timer that is already
/// armed; every other ping arms it.
pub(crate) fn ping(
    registry: &Arc<RegistryInner>,
    job: &Arc<TranscodingJob>,
    state: &mut JobState,
    progress_check_in: bool,
) {
    if state.keepalive == KeepaliveState::Terminating {
        return;
    }
    if job.has_exited() {
        state.cancel_timer();
        state.keepalive = KeepaliveState::Unarmed;
        debug!(job_id = %job.id(), "Keepalive stopped for exited job");
        return;
    }

    state.ping_timeout = registry.config.ping_timeout_for(job.job_type());
    state.last_ping = Instant::now();
    let timeout = state.ping_timeout;

    if progress_check_in && job.job_type().is_progressive() {
        if state.keepalive == KeepaliveState::Armed {
            arm(registry, job, state, timeout);
        }
    } else {
        arm(registry, job, state, timeout);
    }
}

async fn fire(registry: Weak<RegistryInner>, job: Arc<TranscodingJob>, generation: u64) {
    let Some(registry) = registry.upgrade() else {
        return;
    };

    {
        let mut state = job.state.lock();
        if state.generation != generation || state.keepalive != KeepaliveState::Armed {
            debug!(job_id = %job.id(), generation, "Stale keepalive fire ignored");
            return;
        }

        state.keepalive = KeepaliveState::Fired;
        // This task is the timer; nothing may abort it from here on.
        state.timer = None;

        let idle = state.last_ping.elapsed();
        if !job.job_type().is_progressive() && !job.has_exited() && idle < state.ping_timeout {
            let remaining = state.ping_timeout - idle;
            debug!(
                job_id = %job.id(),
                idle_ms = idle.as_millis() as u64,
                "Job pinged since armed, rescheduling keepalive"
            );
            arm(&registry, &job, &mut state, remaining);
            return;
        }

        state.keepalive = KeepaliveState::Terminating;
        state.generation += 1;

        info!(
            job_id = %job.id(),
            play_session_id = ?job.play_session_id(),
            idle_ms = idle.as_millis() as u64,
            has_exited = job.has_exited(),
            "Keepalive expired"
        );
    }

    let report = terminator::terminate(
        &registry,
        &job,
        TerminationReason::KeepaliveExpired,
        TeardownOptions::full(),
    )
    .await;

    if report.is_none() {
        warn!(job_id = %job.id(), "Keepalive expired for a job already being torn down");
    }
}
