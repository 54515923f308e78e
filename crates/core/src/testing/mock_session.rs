//! Mock session-side collaborators: reporter, live streams, throttler.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::transcode::{
    LiveStreamCloser, LiveStreamError, SessionReporter, Throttler, TranscodingProgress,
};

/// A recorded telemetry report.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedReport {
    pub device_id: String,
    pub job_id: String,
    pub progress: TranscodingProgress,
}

/// Mock implementation of [`SessionReporter`].
#[derive(Debug, Clone, Default)]
pub struct MockSessionReporter {
    reports: Arc<RwLock<Vec<RecordedReport>>>,
    cleared: Arc<RwLock<Vec<String>>>,
}

impl MockSessionReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded reports.
    pub fn reports(&self) -> Vec<RecordedReport> {
        self.reports.read().clone()
    }

    /// Most recent report for a device.
    pub fn last_report(&self, device_id: &str) -> Option<RecordedReport> {
        self.reports
            .read()
            .iter()
            .rev()
            .find(|r| r.device_id == device_id)
            .cloned()
    }

    /// Devices whose telemetry was cleared, in order.
    pub fn cleared(&self) -> Vec<String> {
        self.cleared.read().clone()
    }
}

impl SessionReporter for MockSessionReporter {
    fn report_transcoding_info(
        &self,
        device_id: &str,
        job_id: &str,
        progress: &TranscodingProgress,
    ) {
        self.reports.write().push(RecordedReport {
            device_id: device_id.to_string(),
            job_id: job_id.to_string(),
            progress: progress.clone(),
        });
    }

    fn clear_transcoding_info(&self, device_id: &str) {
        self.cleared.write().push(device_id.to_string());
    }
}

/// Mock implementation of [`LiveStreamCloser`].
#[derive(Debug, Clone, Default)]
pub struct MockLiveStreamCloser {
    closed: Arc<RwLock<Vec<String>>>,
    next_error: Arc<RwLock<Option<LiveStreamError>>>,
}

impl MockLiveStreamCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live stream ids closed so far.
    pub fn closed(&self) -> Vec<String> {
        self.closed.read().clone()
    }

    /// Configure the next close to fail with the given error.
    pub fn set_next_error(&self, error: LiveStreamError) {
        *self.next_error.write() = Some(error);
    }
}

#[async_trait]
impl LiveStreamCloser for MockLiveStreamCloser {
    async fn close_live_stream(&self, live_stream_id: &str) -> Result<(), LiveStreamError> {
        if let Some(err) = self.next_error.write().take() {
            return Err(err);
        }
        self.closed.write().push(live_stream_id.to_string());
        Ok(())
    }
}

/// Mock implementation of [`Throttler`].
#[derive(Debug, Clone, Default)]
pub struct MockThrottler {
    stopped: Arc<AtomicBool>,
}

impl MockThrottler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn Throttler> {
        Box::new(self.clone())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Throttler for MockThrottler {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
