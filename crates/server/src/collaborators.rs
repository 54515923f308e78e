//! Collaborators the standalone server plugs into the job registry.
//!
//! The server has no playback session manager of its own, so transcoding
//! telemetry goes to the log instead.

use std::sync::Arc;

use tracing::{debug, info};
use warden_core::transcode::{
    Collaborators, SessionReporter, TranscodingConfig, TranscodingProgress,
};

/// Session reporter that writes telemetry to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSessionReporter;

impl SessionReporter for LoggingSessionReporter {
    fn report_transcoding_info(
        &self,
        device_id: &str,
        job_id: &str,
        progress: &TranscodingProgress,
    ) {
        debug!(
            device_id,
            job_id,
            position_ms = ?progress.position_ms,
            percent_complete = ?progress.percent_complete,
            framerate = ?progress.framerate,
            bitrate = ?progress.bitrate,
            "Transcoding progress"
        );
    }

    fn clear_transcoding_info(&self, device_id: &str) {
        info!(device_id, "Transcoding info cleared");
    }
}

/// Local disk and the configured encoder, with telemetry logged.
pub fn server_collaborators(config: &TranscodingConfig) -> Collaborators {
    Collaborators::for_config(config).with_session_reporter(Arc::new(LoggingSessionReporter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::transcode::{ProcessError, ProcessLauncher, TranscodeCommand};

    #[test]
    fn test_logging_reporter_accepts_reports() {
        let reporter = LoggingSessionReporter;
        let progress = TranscodingProgress {
            position_ms: Some(1_000),
            ..Default::default()
        };
        reporter.report_transcoding_info("device", "job", &progress);
        reporter.clear_transcoding_info("device");
    }

    #[tokio::test]
    async fn test_server_collaborators_use_configured_encoder() {
        let config =
            TranscodingConfig::default().with_ffmpeg_path("/nonexistent/warden-test-ffmpeg");
        let collaborators = server_collaborators(&config);

        let err = collaborators
            .launcher
            .launch(&TranscodeCommand::encoder())
            .await
            .unwrap_err();

        match err {
            ProcessError::NotFound { program } => assert_eq!(program, config.ffmpeg_path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
