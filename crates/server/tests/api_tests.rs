//! API tests driving the router in-process.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{fixtures, TestFixture};
use warden_core::testing::MockProcess;
use warden_core::TeardownOptions;

#[tokio::test]
async fn test_health_reports_registry() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["active_jobs"], 0);
    assert_eq!(response.body["shutting_down"], false);
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["server"]["port"], 8096);
    assert_eq!(response.body["transcoding"]["ffmpeg"], "ffmpeg");
    assert_eq!(
        response.body["transcoding"]["progressive_ping_timeout_ms"],
        10_000
    );
    assert_eq!(response.body["transcoding"]["cleanup"]["max_attempts"], 10);
}

#[tokio::test]
async fn test_list_transcodes_empty() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/transcodes").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 0);
    assert_eq!(response.body["jobs"], json!([]));
}

#[tokio::test]
async fn test_list_and_get_transcodes() {
    let fixture = TestFixture::new();

    let job = fixture
        .registry
        .register(
            fixtures::hls("/transcodes/abc.m3u8", "session-1").with_id("job-1"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();
    fixture.registry.begin_request(&job);

    let response = fixture.get("/api/v1/transcodes").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["jobs"][0]["id"], "job-1");

    let response = fixture.get("/api/v1/transcodes/job-1").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["job_type"], "hls");
    assert_eq!(response.body["play_session_id"], "session-1");
    assert_eq!(response.body["active_request_count"], 1);
    assert_eq!(response.body["keepalive"], "suspended");

    fixture
        .registry
        .kill_job(&job, TeardownOptions::delete_files(false))
        .await;

    let response = fixture.get("/api/v1/transcodes/job-1").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("job-1"));
}

#[tokio::test]
async fn test_get_unknown_transcode() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/transcodes/nope").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture
        .registry
        .register(
            fixtures::progressive("/transcodes/metrics.mkv"),
            MockProcess::new().boxed(),
        )
        .await
        .unwrap();

    // Generate at least one counted request first
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/metrics").await;
    assert_status!(response, StatusCode::OK);
    assert!(response.text.contains("warden_http_requests_total"));
    assert!(response.text.contains("warden_transcode_jobs_active"));
    assert!(response.text.contains("warden_transcode_jobs_registered_total"));
}

#[tokio::test]
async fn test_unknown_route() {
    let fixture = TestFixture::new();

    let response = fixture.get("/api/v1/tickets").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}
