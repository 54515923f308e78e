//! Stream copy engine.
//!
//! Moves bytes from an [`AsyncRead`](tokio::io::AsyncRead) to an
//! [`AsyncWrite`](tokio::io::AsyncWrite) under a cancellation token, with
//! pooled buffers.
//!
//! # Features
//!
//! - Bounded copies (`max_bytes`) that never read past the budget
//! - Empty-read limited copies for sources that stall before data is flushed
//! - Tail mode for following a file an encoder is still writing
//! - One-shot "first bytes written" notification
//!
//! # Example
//!
//! ```ignore
//! use warden_core::copy::{CopyStop, StreamCopier};
//!
//! let copier = StreamCopier::with_defaults();
//! let outcome = copier.copy_exact(&mut file, &mut socket, 1_000_000, &cancel).await?;
//! if outcome.stop == CopyStop::Cancelled {
//!     tracing::debug!(bytes = outcome.bytes_transferred, "Client went away");
//! }
//! ```

mod buffer_pool;
mod config;
mod engine;
mod error;

pub use buffer_pool::{BufferPool, BufferPoolStats, PooledBuffer};
pub use config::{StreamingConfig, DEFAULT_BUFFER_SIZE};
pub use engine::{CopyOptions, CopyOutcome, CopyStop, StartCallback, StreamCopier};
pub use error::CopyError;
