//! Configuration for the stream copy engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default copy buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 81_920;

/// Configuration for [`StreamCopier`](super::StreamCopier).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Size of the buffer used for each read.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Backoff between empty reads when an empty-read limit is set (milliseconds).
    #[serde(default = "default_empty_read_backoff")]
    pub empty_read_backoff_ms: u64,

    /// Backoff between empty reads when tailing a growing file (milliseconds).
    #[serde(default = "default_tail_backoff")]
    pub tail_backoff_ms: u64,

    /// Maximum number of idle buffers kept in the pool.
    #[serde(default = "default_max_pooled_buffers")]
    pub max_pooled_buffers: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_empty_read_backoff() -> u64 {
    50
}

fn default_tail_backoff() -> u64 {
    100
}

fn default_max_pooled_buffers() -> usize {
    64
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            empty_read_backoff_ms: default_empty_read_backoff(),
            tail_backoff_ms: default_tail_backoff(),
            max_pooled_buffers: default_max_pooled_buffers(),
        }
    }
}

impl StreamingConfig {
    /// Sets the default buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the number of idle buffers the pool may keep.
    pub fn with_max_pooled_buffers(mut self, max: usize) -> Self {
        self.max_pooled_buffers = max;
        self
    }

    pub fn empty_read_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_read_backoff_ms)
    }

    pub fn tail_backoff(&self) -> Duration {
        Duration::from_millis(self.tail_backoff_ms)
    }
}
