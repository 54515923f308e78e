//! Mock encoder process for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::transcode::{ProcessError, TranscodeProcess};

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

/// How the mock reacts to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// Exits as soon as it is asked to stop.
    Graceful,
    /// Keeps running until killed.
    Unresponsive,
}

#[derive(Debug)]
struct ProcessState {
    behavior: StopBehavior,
    exited: bool,
    stop_requests: u32,
    kills: u32,
    fail_kill: bool,
}

/// Mock implementation of [`TranscodeProcess`].
///
/// Clones share state, so a test can keep one handle while the registry owns
/// the boxed process.
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::testing::MockProcess;
///
/// let process = MockProcess::unresponsive();
/// let job = registry.register(registration, process.boxed()).await?;
/// registry.kill_job(&job, TeardownOptions::full()).await;
/// assert_eq!(process.kills(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockProcess {
    pid: u32,
    state: Arc<RwLock<ProcessState>>,
}

impl Default for MockProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcess {
    /// Create a process that exits when asked to stop.
    pub fn new() -> Self {
        Self::with_behavior(StopBehavior::Graceful)
    }

    /// Create a process that ignores stop requests.
    pub fn unresponsive() -> Self {
        Self::with_behavior(StopBehavior::Unresponsive)
    }

    pub fn with_behavior(behavior: StopBehavior) -> Self {
        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(RwLock::new(ProcessState {
                behavior,
                exited: false,
                stop_requests: 0,
                kills: 0,
                fail_kill: false,
            })),
        }
    }

    /// Boxed handle sharing this mock's state.
    pub fn boxed(&self) -> Box<dyn TranscodeProcess> {
        Box::new(self.clone())
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self) {
        self.state.write().exited = true;
    }

    /// Make kill attempts fail.
    pub fn set_fail_kill(&self, fail: bool) {
        self.state.write().fail_kill = fail;
    }

    pub fn is_exited(&self) -> bool {
        self.state.read().exited
    }

    pub fn stop_requests(&self) -> u32 {
        self.state.read().stop_requests
    }

    pub fn kills(&self) -> u32 {
        self.state.read().kills
    }
}

#[async_trait]
impl TranscodeProcess for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn request_stop(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.write();
        if state.exited {
            return Err(ProcessError::AlreadyExited);
        }
        state.stop_requests += 1;
        if state.behavior == StopBehavior::Graceful {
            state.exited = true;
        }
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool, ProcessError> {
        if self.is_exited() {
            return Ok(true);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.is_exited())
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        let mut state = self.state.write();
        if state.exited {
            return Err(ProcessError::AlreadyExited);
        }
        state.kills += 1;
        if state.fail_kill {
            return Err(ProcessError::Io(std::io::Error::other("kill refused")));
        }
        state.exited = true;
        Ok(())
    }
}
