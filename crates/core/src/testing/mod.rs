//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator the job
//! registry drives, so the keepalive and teardown paths can be exercised
//! without spawning encoders or touching the disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::testing::{fixtures, MockProcess};
//! use warden_core::TranscodingConfig;
//!
//! let services = fixtures::MockServices::new();
//! let registry = services.registry(TranscodingConfig::default());
//!
//! let process = MockProcess::new();
//! let job = registry
//!     .register(fixtures::progressive("/transcodes/a.mkv"), process.boxed())
//!     .await?;
//! ```

mod mock_file_system;
mod mock_launcher;
mod mock_process;
mod mock_session;
mod readers;

pub use mock_file_system::MockFileSystem;
pub use mock_launcher::MockLauncher;
pub use mock_process::{MockProcess, StopBehavior};
pub use mock_session::{MockLiveStreamCloser, MockSessionReporter, MockThrottler, RecordedReport};
pub use readers::{ChunkedReader, StallingReader};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::{MockFileSystem, MockLauncher, MockLiveStreamCloser, MockSessionReporter};
    use crate::transcode::{
        Collaborators, JobRegistration, JobRegistry, TranscodingConfig, TranscodingJobType,
    };

    /// Progressive registration for `path` owned by a test device.
    pub fn progressive(path: impl Into<PathBuf>) -> JobRegistration {
        JobRegistration::new(path, TranscodingJobType::Progressive).with_device("device-1")
    }

    /// HLS registration for `playlist` in a play session.
    pub fn hls(playlist: impl Into<PathBuf>, play_session_id: &str) -> JobRegistration {
        JobRegistration::new(playlist, TranscodingJobType::Hls)
            .with_device("device-1")
            .with_play_session(play_session_id)
    }

    /// Playlist and segment files an HLS job leaves in `dir` for `stem`.
    pub fn hls_output(dir: &str, stem: &str, segments: usize) -> Vec<PathBuf> {
        let dir = PathBuf::from(dir);
        let mut files: Vec<PathBuf> = (0..segments)
            .map(|i| dir.join(format!("{}{}.ts", stem, i)))
            .collect();
        files.push(dir.join(format!("{}.m3u8", stem)));
        files
    }

    /// One set of mocks wired into [`Collaborators`].
    #[derive(Debug, Clone, Default)]
    pub struct MockServices {
        pub file_system: MockFileSystem,
        pub session_reporter: MockSessionReporter,
        pub live_streams: MockLiveStreamCloser,
        pub launcher: MockLauncher,
    }

    impl MockServices {
        pub fn new() -> Self {
            Self::default()
        }

        /// Mocks seeded with existing files.
        pub fn with_files<I, P>(files: I) -> Self
        where
            I: IntoIterator<Item = P>,
            P: Into<PathBuf>,
        {
            Self {
                file_system: MockFileSystem::with_files(files),
                ..Self::default()
            }
        }

        pub fn collaborators(&self) -> Collaborators {
            Collaborators::local()
                .with_file_system(Arc::new(self.file_system.clone()))
                .with_session_reporter(Arc::new(self.session_reporter.clone()))
                .with_live_streams(Arc::new(self.live_streams.clone()))
                .with_launcher(Arc::new(self.launcher.clone()))
        }

        /// Registry backed by these mocks.
        pub fn registry(&self, config: TranscodingConfig) -> JobRegistry {
            JobRegistry::with_collaborators(config, self.collaborators())
        }
    }
}
