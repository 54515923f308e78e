//! Transcoding job lifecycle integration tests.
//!
//! These run on a paused clock, so keepalive timeouts, grace periods and
//! cleanup retries elapse instantly while keeping their relative order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use warden_core::testing::{fixtures, MockProcess, MockThrottler};
use warden_core::transcode::{
    CleanupConfig, CleanupOutcome, JobRegistration, KeepaliveState, ProcessError, StopMethod,
    TeardownOptions, TerminationReason, TranscodeCommand, TranscodeError, TranscodingConfig,
    TranscodingJobType,
};

const MOVIE: &str = "/transcodes/movie.mkv";
const PLAYLIST: &str = "/transcodes/seg.m3u8";

fn config() -> TranscodingConfig {
    TranscodingConfig::default().with_transcode_dir("/transcodes")
}

/// Lets spawned tasks that are ready run before the next assertion.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_progressive_job_killed_after_idle_timeout() {
    let services = fixtures::MockServices::with_files([MOVIE]);
    let registry = services.registry(config());
    let process = MockProcess::new();

    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();
    assert_eq!(job.keepalive_state(), KeepaliveState::Armed);

    // A long request holds the job open past its timeout.
    registry.begin_request(&job);
    assert_eq!(job.keepalive_state(), KeepaliveState::Suspended);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(registry.len(), 1);

    // The last request out re-arms for the full progressive timeout.
    registry.end_request(&job);
    assert_eq!(job.keepalive_state(), KeepaliveState::Armed);
    sleep(Duration::from_millis(9_900)).await;
    assert_eq!(registry.len(), 1);
    assert_eq!(process.stop_requests(), 0);

    sleep(Duration::from_millis(200)).await;
    assert!(registry.is_empty());

    job.wait_terminated().await;
    assert_eq!(process.stop_requests(), 1);
    assert!(services.file_system.files().is_empty());
    assert_eq!(services.session_reporter.cleared(), vec!["device-1".to_string()]);
    assert!(!registry.path_locks().contains(MOVIE));
}

#[tokio::test(start_paused = true)]
async fn test_hls_job_survives_pings_then_expires() {
    let services = fixtures::MockServices::with_files(fixtures::hls_output("/transcodes", "seg", 2));
    let registry = services.registry(config());

    let job = registry
        .register(fixtures::hls(PLAYLIST, "session-a"), MockProcess::new().boxed())
        .await
        .unwrap();

    for _ in 0..4 {
        sleep(Duration::from_secs(30)).await;
        assert_eq!(registry.ping("session-a", Some(false)).unwrap(), 1);
    }
    assert_eq!(registry.len(), 1);

    sleep(Duration::from_secs(59)).await;
    assert_eq!(registry.len(), 1);

    sleep(Duration::from_secs(2)).await;
    assert!(registry.is_empty());

    job.wait_terminated().await;
    assert!(services.file_system.files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ping_is_case_insensitive_and_records_pause() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());

    let job = registry
        .register(fixtures::hls(PLAYLIST, "Session-A"), MockProcess::new().boxed())
        .await
        .unwrap();

    assert_eq!(registry.ping("SESSION-a", Some(true)).unwrap(), 1);
    assert!(job.is_user_paused());

    assert_eq!(registry.ping("other", None).unwrap(), 0);
    assert!(job.is_user_paused());
}

#[tokio::test(start_paused = true)]
async fn test_ping_rejects_blank_session() {
    let registry = fixtures::MockServices::new().registry(config());

    assert!(matches!(
        registry.ping("  ", None),
        Err(TranscodeError::InvalidSessionId)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_progressive_check_in_does_not_rearm_suspended_job() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());

    let job = registry
        .register(
            fixtures::progressive(MOVIE).with_play_session("session-p"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    registry.begin_request(&job);
    registry.ping("session-p", None).unwrap();
    assert_eq!(job.keepalive_state(), KeepaliveState::Suspended);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progressive_check_in_extends_armed_timer() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());

    registry
        .register(
            fixtures::progressive(MOVIE).with_play_session("session-p"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(8)).await;
    registry.ping("session-p", None).unwrap();

    sleep(Duration::from_secs(8)).await;
    assert_eq!(registry.len(), 1);

    sleep(Duration::from_secs(3)).await;
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_count_never_goes_negative() {
    let registry = fixtures::MockServices::new().registry(config());
    let job = registry
        .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
        .await
        .unwrap();

    let generation = job.keepalive_generation();
    registry.end_request(&job);
    registry.end_request(&job);
    assert_eq!(job.active_request_count(), 0);
    // Unbalanced ends leave the timer alone
    assert_eq!(job.keepalive_generation(), generation);

    registry.begin_request(&job);
    registry.begin_request(&job);
    registry.end_request(&job);
    assert_eq!(job.active_request_count(), 1);
    assert_eq!(job.keepalive_state(), KeepaliveState::Suspended);

    let suspended = job.keepalive_generation();
    registry.end_request(&job);
    assert_eq!(job.active_request_count(), 0);
    assert_eq!(job.keepalive_state(), KeepaliveState::Armed);
    // Exactly one re-arm for the 1 -> 0 crossing
    assert_eq!(job.keepalive_generation(), suspended + 1);

    registry.end_request(&job);
    assert_eq!(job.keepalive_generation(), suspended + 1);
}

#[tokio::test(start_paused = true)]
async fn test_begin_request_for_path() {
    let registry = fixtures::MockServices::new().registry(config());
    let job = registry
        .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
        .await
        .unwrap();

    let found = registry
        .begin_request_for_path(MOVIE, TranscodingJobType::Progressive)
        .unwrap();
    assert!(Arc::ptr_eq(&found, &job));
    assert_eq!(job.active_request_count(), 1);

    assert!(registry
        .begin_request_for_path(MOVIE, TranscodingJobType::Hls)
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_output_path_is_exclusive() {
    let registry = fixtures::MockServices::new().registry(config());

    let first = registry
        .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
        .await
        .unwrap();

    let busy = registry.try_register(fixtures::progressive(MOVIE), MockProcess::new().boxed());
    assert!(matches!(busy, Err(TranscodeError::OutputPathBusy { .. })));

    // A blocking registration waits for the first job to go away.
    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
                .await
        })
    };
    settle().await;
    assert!(!waiter.is_finished());

    registry
        .kill_job(&first, TeardownOptions::delete_files(false))
        .await
        .unwrap();

    let second = waiter.await.unwrap().unwrap();
    assert_ne!(second.id(), first.id());
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_job_id_rejected() {
    let registry = fixtures::MockServices::new().registry(config());

    registry
        .register(
            fixtures::progressive(MOVIE).with_id("job-1"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    let duplicate = registry
        .register(
            fixtures::progressive("/transcodes/other.mkv").with_id("job-1"),
            MockProcess::new().boxed(),
        )
        .await;
    assert!(matches!(duplicate, Err(TranscodeError::DuplicateJob { .. })));
    // The rejected registration gave its path back.
    assert!(!registry.path_locks().contains("/transcodes/other.mkv"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_kills_tear_down_once() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::new();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        registry.kill_job(&job, TeardownOptions::full()),
        registry.kill_job(&job, TeardownOptions::full()),
    );

    assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
    assert_eq!(process.stop_requests(), 1);
    assert!(job.is_terminated());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_kill_still_finishes_teardown() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::unresponsive();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    // The caller gives up while the process is still in its grace period
    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        registry.kill_job(&job, TeardownOptions::delete_files(false)),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!job.is_terminated());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(process.stop_requests(), 1);
    assert_eq!(process.kills(), 1);
    assert!(process.is_exited());
    assert!(job.is_terminated());

    // Later callers see the finished teardown instead of hanging
    let again = tokio::time::timeout(
        Duration::from_secs(1),
        registry.kill_job(&job, TeardownOptions::delete_files(false)),
    )
    .await;
    assert!(matches!(again, Ok(None)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_abandoned_kill() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::unresponsive();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    let _ = tokio::time::timeout(
        Duration::from_secs(1),
        registry.kill_job(&job, TeardownOptions::delete_files(false)),
    )
    .await;
    assert!(registry.is_empty());

    registry.shutdown().await;
    assert_eq!(process.kills(), 1);
    assert!(job.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::new();
    let throttler = MockThrottler::new();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();
    registry.attach_throttler(&job, throttler.boxed()).await;

    let report = registry
        .kill_job(&job, TeardownOptions::delete_files(false))
        .await
        .unwrap();

    assert_eq!(report.stop, StopMethod::Graceful);
    assert_eq!(report.reason, TerminationReason::Requested);
    assert!(matches!(report.cleanup, CleanupOutcome::Skipped));
    assert_eq!(process.kills(), 0);
    assert!(throttler.is_stopped());
    assert!(job.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_process_is_killed_after_grace() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::unresponsive();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    let started = Instant::now();
    let report = registry
        .kill_job(&job, TeardownOptions::delete_files(false))
        .await
        .unwrap();

    assert_eq!(report.stop, StopMethod::Forced);
    assert_eq!(process.stop_requests(), 1);
    assert_eq!(process.kills(), 1);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_exited_process_is_not_signalled() {
    let registry = fixtures::MockServices::new().registry(config());
    let process = MockProcess::new();
    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    process.exit();
    registry.mark_exited(&job);

    let report = registry
        .kill_job(&job, TeardownOptions::delete_files(false))
        .await
        .unwrap();
    assert_eq!(report.stop, StopMethod::AlreadyExited);
    assert_eq!(process.stop_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ping_stops_timer_of_exited_job() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());
    let job = registry
        .register(fixtures::hls(PLAYLIST, "session-a"), MockProcess::new().boxed())
        .await
        .unwrap();
    let last_ping = job.last_ping();

    registry.mark_exited(&job);
    sleep(Duration::from_secs(30)).await;
    registry.ping("session-a", None).unwrap();

    assert_eq!(job.keepalive_state(), KeepaliveState::Unarmed);
    assert_eq!(job.last_ping(), last_ping);

    // Nothing expires it any more; it leaves when its session is killed
    sleep(Duration::from_secs(120)).await;
    assert_eq!(registry.len(), 1);

    let reports = registry.kill_session_jobs("device-1", Some("session-a"), false).await;
    assert_eq!(reports.len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_segment_cleanup_retries_then_reports_failure() {
    let files = fixtures::hls_output("/transcodes", "seg", 2);
    let services = fixtures::MockServices::with_files(files.clone());
    let locked = PathBuf::from("/transcodes/seg1.ts");
    services.file_system.fail_deletes(&locked, u32::MAX);

    let registry = services.registry(config());
    let job = registry
        .register(fixtures::hls(PLAYLIST, "session-a"), MockProcess::new().boxed())
        .await
        .unwrap();

    let started = Instant::now();
    let report = registry.kill_job(&job, TeardownOptions::full()).await.unwrap();

    match &report.cleanup {
        CleanupOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(*attempts, 10);
            assert_eq!(last_error.failed_paths(), vec![&locked]);
        }
        other => panic!("expected exhausted cleanup, got {:?}", other),
    }
    assert_eq!(services.file_system.delete_attempts(&locked), 10);
    assert_eq!(services.file_system.delete_attempts("/transcodes/seg0.ts"), 1);
    assert_eq!(services.file_system.files(), vec![locked]);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1_500 + 9 * 500));
    assert!(elapsed < Duration::from_millis(7_000));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_succeeds_after_transient_lock() {
    let services = fixtures::MockServices::with_files([MOVIE]);
    services.file_system.fail_deletes(MOVIE, 2);
    let cleanup = CleanupConfig {
        max_attempts: 3,
        ..CleanupConfig::default()
    };
    let registry = services.registry(config().with_cleanup(cleanup));

    let job = registry
        .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
        .await
        .unwrap();
    let report = registry.kill_job(&job, TeardownOptions::full()).await.unwrap();

    assert!(matches!(
        report.cleanup,
        CleanupOutcome::Completed {
            attempts: 3,
            deleted: 1
        }
    ));
    assert!(services.file_system.files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_expiry_closes_live_stream() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());

    let job = registry
        .register(
            fixtures::hls(PLAYLIST, "session-live").with_live_stream("live-1"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    sleep(Duration::from_secs(61)).await;
    job.wait_terminated().await;

    assert_eq!(services.live_streams.closed(), vec!["live-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_kill_session_jobs() {
    let services = fixtures::MockServices::with_files([
        "/transcodes/a.m3u8",
        "/transcodes/b.m3u8",
        "/transcodes/c.m3u8",
    ]);
    let registry = services.registry(config());

    for (path, session) in [
        ("/transcodes/a.m3u8", "abc"),
        ("/transcodes/b.m3u8", "abc"),
        ("/transcodes/c.m3u8", "xyz"),
    ] {
        registry
            .register(
                fixtures::hls(path, session).with_live_stream("live"),
                MockProcess::new().boxed(),
            )
            .await
            .unwrap();
    }

    let reports = registry.kill_session_jobs("device-1", Some("ABC"), false).await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.live_stream_closed.is_none()));
    assert_eq!(services.file_system.files().len(), 3);
    assert!(services.live_streams.closed().is_empty());
    assert_eq!(registry.len(), 1);
    assert!(registry.find_by_session_id("xyz").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_kill_session_jobs_by_device() {
    let registry = fixtures::MockServices::new().registry(config());

    registry
        .register(
            JobRegistration::new(MOVIE, TranscodingJobType::Progressive).with_device("TV"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();
    registry
        .register(
            JobRegistration::new("/transcodes/b.mkv", TranscodingJobType::Progressive)
                .with_device("phone"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    let reports = registry.kill_session_jobs("tv", None, true).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_on_transcode_failed_to_start() {
    let services = fixtures::MockServices::new();
    let registry = services.registry(config());
    let process = MockProcess::new();

    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    assert!(registry.on_transcode_failed_to_start(
        MOVIE,
        TranscodingJobType::Progressive,
        Some("device-1")
    ));
    assert!(registry.is_empty());
    assert!(job.is_terminated());
    assert_eq!(process.stop_requests(), 0);
    assert!(!registry.path_locks().contains(MOVIE));
    assert_eq!(services.session_reporter.cleared(), vec!["device-1".to_string()]);

    // Nothing left to forget, but telemetry is still cleared.
    assert!(!registry.on_transcode_failed_to_start(
        MOVIE,
        TranscodingJobType::Progressive,
        Some("device-1")
    ));
    assert_eq!(services.session_reporter.cleared().len(), 2);

    // The stale timer never fires against the removed job.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(process.stop_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_transcode_reports_progress() {
    let services = fixtures::MockServices::new();
    services.launcher.set_stderr(
        "Input #0, matroska,webm, from 'movie.mkv':\n\
         frame=  750 fps= 25.0 q=28.0 size=     512kB time=00:00:30.00 bitrate= 139.8kbits/s speed=1.0x\n",
    );
    let registry = services.registry(config());

    let command = TranscodeCommand::new("ffmpeg")
        .args(["-i", "movie.mkv", MOVIE])
        .with_media_duration(Duration::from_secs(60));
    let started = registry
        .start_transcode(fixtures::progressive(MOVIE), command)
        .await
        .unwrap();
    assert!(started.stdout.is_none());
    assert_eq!(services.launcher.commands().len(), 1);

    settle().await;

    let report = services.session_reporter.last_report("device-1").unwrap();
    assert_eq!(report.job_id, started.job.id());
    assert_eq!(report.progress.percent_complete, Some(50.0));
    assert_eq!(report.progress.bytes_transcoded, Some(512 * 1024));
    assert_eq!(report.progress.position_ms, Some(30_000));
    assert!(started.job.has_exited());

    // Still registered until the keepalive notices nobody is watching.
    assert_eq!(registry.len(), 1);
    sleep(Duration::from_secs(11)).await;
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_transcode_launch_failure_frees_path() {
    let services = fixtures::MockServices::new();
    services.launcher.set_next_error(ProcessError::NotFound {
        program: "ffmpeg".into(),
    });
    let registry = services.registry(config());

    let result = registry
        .start_transcode(fixtures::progressive(MOVIE), TranscodeCommand::new("ffmpeg"))
        .await;

    assert!(matches!(result, Err(TranscodeError::Launch(_))));
    assert!(registry.is_empty());
    assert!(!registry.path_locks().contains(MOVIE));
    assert_eq!(services.session_reporter.cleared(), vec!["device-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let services = fixtures::MockServices::with_files([MOVIE, "/transcodes/b.mkv"]);
    let registry = services.registry(config());

    let a = MockProcess::new();
    let b = MockProcess::unresponsive();
    registry
        .register(fixtures::progressive(MOVIE), a.boxed())
        .await
        .unwrap();
    registry
        .register(fixtures::progressive("/transcodes/b.mkv"), b.boxed())
        .await
        .unwrap();

    registry.shutdown().await;

    assert!(registry.is_empty());
    assert!(registry.is_shutting_down());
    assert!(a.is_exited());
    assert_eq!(b.kills(), 1);
    assert!(services.file_system.files().is_empty());

    let late = registry
        .register(fixtures::progressive(MOVIE), MockProcess::new().boxed())
        .await;
    assert!(matches!(late, Err(TranscodeError::ShuttingDown)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_keepalive_teardown() {
    let services = fixtures::MockServices::with_files([MOVIE]);
    let registry = services.registry(config());
    let process = MockProcess::unresponsive();

    let job = registry
        .register(fixtures::progressive(MOVIE), process.boxed())
        .await
        .unwrap();

    // Let the keepalive start its teardown, then shut down mid-grace-period.
    sleep(Duration::from_millis(10_100)).await;
    assert!(job.is_terminating());
    assert!(!job.is_terminated());

    registry.shutdown().await;

    assert!(job.is_terminated());
    assert_eq!(process.kills(), 1);
    assert!(services.file_system.files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshots() {
    let registry = fixtures::MockServices::new().registry(config());
    let job = registry
        .register(
            fixtures::hls(PLAYLIST, "session-a").with_id("job-42"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();
    registry.begin_request(&job);

    let snapshots = registry.snapshots();
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(snapshot.id, "job-42");
    assert_eq!(snapshot.job_type, TranscodingJobType::Hls);
    assert_eq!(snapshot.active_request_count, 1);
    assert_eq!(snapshot.keepalive, KeepaliveState::Suspended);
    assert_eq!(snapshot.ping_timeout_ms, 60_000);
}
