//! Mock process launcher for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::Cursor;
use std::sync::Arc;

use super::mock_process::MockProcess;
use crate::transcode::{
    LaunchedProcess, OutputReader, ProcessError, ProcessLauncher, TranscodeCommand,
};

/// Mock implementation of [`ProcessLauncher`].
///
/// Each launch produces a [`MockProcess`]. Configured stderr/stdout content is
/// served from memory, so progress monitors see EOF right after it.
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    commands: Arc<RwLock<Vec<TranscodeCommand>>>,
    processes: Arc<RwLock<Vec<MockProcess>>>,
    stderr: Arc<RwLock<Option<String>>>,
    stdout: Arc<RwLock<Option<Vec<u8>>>>,
    next_error: Arc<RwLock<Option<ProcessError>>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostic output every launched process writes before exiting.
    pub fn set_stderr(&self, output: impl Into<String>) {
        *self.stderr.write() = Some(output.into());
    }

    /// Bytes served as stdout when the command captures it.
    pub fn set_stdout(&self, output: impl Into<Vec<u8>>) {
        *self.stdout.write() = Some(output.into());
    }

    /// Configure the next launch to fail with the given error.
    pub fn set_next_error(&self, error: ProcessError) {
        *self.next_error.write() = Some(error);
    }

    /// Commands launched so far.
    pub fn commands(&self) -> Vec<TranscodeCommand> {
        self.commands.read().clone()
    }

    /// Handles to the processes launched so far.
    pub fn processes(&self) -> Vec<MockProcess> {
        self.processes.read().clone()
    }
}

#[async_trait]
impl ProcessLauncher for MockLauncher {
    async fn launch(&self, command: &TranscodeCommand) -> Result<LaunchedProcess, ProcessError> {
        if let Some(err) = self.next_error.write().take() {
            return Err(err);
        }

        self.commands.write().push(command.clone());
        let process = MockProcess::new();
        self.processes.write().push(process.clone());

        let stderr = self
            .stderr
            .read()
            .clone()
            .map(|text| Box::new(Cursor::new(text.into_bytes())) as OutputReader);
        let stdout = if command.capture_stdout {
            let bytes = self.stdout.read().clone().unwrap_or_default();
            Some(Box::new(Cursor::new(bytes)) as OutputReader)
        } else {
            None
        };

        Ok(LaunchedProcess {
            process: process.boxed(),
            stdout,
            stderr,
        })
    }
}
