pub mod config;
pub mod copy;
pub mod metrics;
pub mod testing;
pub mod transcode;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    SanitizedTranscodingConfig, ServerConfig,
};
pub use copy::{
    BufferPool, BufferPoolStats, CopyError, CopyOptions, CopyOutcome, CopyStop, StreamCopier,
    StreamingConfig,
};
pub use transcode::{
    ActiveRequest, Collaborators, JobRegistration, JobRegistry, JobSnapshot, KeepaliveState,
    TeardownOptions, TeardownReport, TerminationReason, TranscodeError, TranscodingConfig,
    TranscodingJob, TranscodingJobType, TranscodingProgress,
};
