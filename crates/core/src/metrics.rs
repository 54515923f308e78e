//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job registry (registrations, active jobs, terminations)
//! - Teardown (process stops, cleanup)
//! - Copy engine (bytes, copies by stop reason)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Job Registry
// =============================================================================

/// Jobs currently registered.
pub static ACTIVE_JOBS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "warden_transcode_jobs_active",
        "Number of registered transcoding jobs",
    )
    .unwrap()
});

/// Jobs registered by job type.
pub static JOBS_REGISTERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "warden_transcode_jobs_registered_total",
            "Total transcoding jobs registered",
        ),
        &["job_type"], // "progressive", "hls", "dash"
    )
    .unwrap()
});

/// Jobs torn down by reason.
pub static JOBS_TERMINATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "warden_transcode_jobs_terminated_total",
            "Total transcoding jobs terminated",
        ),
        &["reason"], // "keepalive_expired", "requested", "failed_to_start", "shutdown"
    )
    .unwrap()
});

// =============================================================================
// Teardown
// =============================================================================

/// Encoder stops by method.
pub static PROCESS_STOPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "warden_process_stops_total",
            "Encoder processes stopped, by method",
        ),
        &["method"], // "graceful", "forced", "already_exited", "no_process", "failed"
    )
    .unwrap()
});

/// Teardown duration in seconds.
pub static TEARDOWN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "warden_teardown_duration_seconds",
            "Duration of job teardown including cleanup",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]),
        &["reason"],
    )
    .unwrap()
});

/// Cleanups that exhausted their retry budget.
pub static CLEANUP_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "warden_cleanup_failures_total",
        "Partial output deletions that gave up after all retries",
    )
    .unwrap()
});

// =============================================================================
// Copy Engine
// =============================================================================

/// Bytes written by the copy engine.
pub static COPY_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "warden_copy_bytes_total",
        "Total bytes written by stream copies",
    )
    .unwrap()
});

/// Finished copies by stop reason.
pub static COPIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("warden_copies_total", "Total stream copies finished"),
        &["stop"], // "cancelled", "source_exhausted", "limit_reached", "empty_read_limit", "destination_closed", "error"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Registry
        Box::new(ACTIVE_JOBS.clone()),
        Box::new(JOBS_REGISTERED.clone()),
        Box::new(JOBS_TERMINATED.clone()),
        // Teardown
        Box::new(PROCESS_STOPS.clone()),
        Box::new(TEARDOWN_DURATION.clone()),
        Box::new(CLEANUP_FAILURES.clone()),
        // Copy engine
        Box::new(COPY_BYTES_TOTAL.clone()),
        Box::new(COPIES_TOTAL.clone()),
    ]
}
