//! Cancellable buffered copy between an async source and destination.

use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::buffer_pool::BufferPool;
use super::config::StreamingConfig;
use super::error::{is_destination_closed, CopyError};
use crate::metrics;

/// One-shot callback fired when the first bytes reach the destination.
pub type StartCallback = Box<dyn FnOnce() + Send + 'static>;

/// Why a copy stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStop {
    /// The cancellation token was triggered.
    Cancelled,
    /// The source reported end of stream.
    SourceExhausted,
    /// `max_bytes` were transferred.
    LimitReached,
    /// Too many consecutive empty reads.
    EmptyReadLimit,
    /// The destination stopped accepting data.
    DestinationClosed,
}

impl CopyStop {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::SourceExhausted => "source_exhausted",
            Self::LimitReached => "limit_reached",
            Self::EmptyReadLimit => "empty_read_limit",
            Self::DestinationClosed => "destination_closed",
        }
    }
}

impl fmt::Display for CopyStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Bytes written to the destination.
    pub bytes_transferred: u64,
    /// Reason the copy ended.
    pub stop: CopyStop,
}

/// Options for a single copy call.
#[derive(Default)]
pub struct CopyOptions {
    /// Read buffer size. Falls back to the copier's configured size.
    pub buffer_size: Option<usize>,
    /// Stop after exactly this many bytes.
    pub max_bytes: Option<u64>,
    /// Stop after this many consecutive empty reads.
    pub empty_read_limit: Option<u32>,
    /// Keep reading through empty reads until cancelled.
    pub tail_until_cancelled: bool,
    on_first_bytes: Option<StartCallback>,
}

impl CopyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = Some(max);
        self
    }

    pub fn with_empty_read_limit(mut self, limit: u32) -> Self {
        self.empty_read_limit = Some(limit);
        self
    }

    /// Never stop on empty reads; only cancellation ends the copy.
    pub fn tail_until_cancelled(mut self) -> Self {
        self.tail_until_cancelled = true;
        self
    }

    /// Sets a callback fired once, when bytes are first written.
    pub fn on_first_bytes<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_first_bytes = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOptions")
            .field("buffer_size", &self.buffer_size)
            .field("max_bytes", &self.max_bytes)
            .field("empty_read_limit", &self.empty_read_limit)
            .field("tail_until_cancelled", &self.tail_until_cancelled)
            .field("on_first_bytes", &self.on_first_bytes.is_some())
            .finish()
    }
}

/// Copies bytes between async streams using pooled buffers.
///
/// # Example
///
/// ```ignore
/// use warden_core::copy::{CopyOptions, StreamCopier};
///
/// let copier = StreamCopier::with_defaults();
/// let outcome = copier
///     .copy(&mut file, &mut response, &job.cancellation_token(), CopyOptions::new().tail_until_cancelled())
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct StreamCopier {
    config: StreamingConfig,
    pool: Arc<BufferPool>,
}

/// Mutable progress shared between the copy loop and its caller.
struct CopyState {
    transferred: u64,
    callback: Option<StartCallback>,
    notified: Option<JoinHandle<()>>,
}

impl CopyState {
    /// Dispatches the start callback if it is still armed.
    fn notify_started(&mut self) {
        if let Some(callback) = self.callback.take() {
            self.notified = Some(tokio::spawn(async move { callback() }));
        }
    }
}

impl StreamCopier {
    /// Creates a copier with its own buffer pool.
    pub fn new(config: StreamingConfig) -> Self {
        let pool = Arc::new(BufferPool::new(config.max_pooled_buffers));
        Self { config, pool }
    }

    pub fn with_defaults() -> Self {
        Self::new(StreamingConfig::default())
    }

    /// Creates a copier that shares an existing pool.
    pub fn with_pool(config: StreamingConfig, pool: Arc<BufferPool>) -> Self {
        Self { config, pool }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Copies from `source` to `destination` until one of the stop conditions
    /// in `options` is met or `cancel` fires.
    ///
    /// Cancellation and a closed destination end the copy with `Ok`. The
    /// first-bytes callback, if dispatched, has finished before this returns.
    pub async fn copy<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        cancel: &CancellationToken,
        mut options: CopyOptions,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let buffer_size = options.buffer_size.unwrap_or(self.config.buffer_size);
        if buffer_size == 0 {
            return Err(CopyError::invalid_options("buffer size must be positive"));
        }
        if options.empty_read_limit == Some(0) {
            return Err(CopyError::invalid_options(
                "empty read limit must be positive",
            ));
        }

        let mut state = CopyState {
            transferred: 0,
            callback: options.on_first_bytes.take(),
            notified: None,
        };

        let result = self
            .run(source, destination, cancel, &mut options, buffer_size, &mut state)
            .await;

        if let Some(handle) = state.notified.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "First-bytes callback failed");
            }
        }

        metrics::COPY_BYTES_TOTAL.inc_by(state.transferred);

        match result {
            Ok(stop) => {
                metrics::COPIES_TOTAL.with_label_values(&[stop.as_str()]).inc();
                debug!(
                    bytes = state.transferred,
                    stop = %stop,
                    "Copy finished"
                );
                Ok(CopyOutcome {
                    bytes_transferred: state.transferred,
                    stop,
                })
            }
            Err(e) => {
                metrics::COPIES_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    async fn run<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        cancel: &CancellationToken,
        options: &mut CopyOptions,
        buffer_size: usize,
        state: &mut CopyState,
    ) -> Result<CopyStop, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buffer = self.pool.acquire(buffer_size);
        let mut empty_reads: u32 = 0;

        let stop = loop {
            if cancel.is_cancelled() {
                break CopyStop::Cancelled;
            }

            let want = match options.max_bytes {
                Some(max) => {
                    let remaining = max.saturating_sub(state.transferred);
                    if remaining == 0 {
                        break CopyStop::LimitReached;
                    }
                    remaining.min(buffer.len() as u64) as usize
                }
                None => buffer.len(),
            };

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CopyStop::Cancelled,
                result = source.read(&mut buffer[..want]) => match result {
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(CopyError::Read(e)),
                },
            };

            if read == 0 {
                let backoff = if options.tail_until_cancelled {
                    self.config.tail_backoff()
                } else if let Some(limit) = options.empty_read_limit {
                    empty_reads += 1;
                    if empty_reads >= limit {
                        break CopyStop::EmptyReadLimit;
                    }
                    self.config.empty_read_backoff()
                } else {
                    break CopyStop::SourceExhausted;
                };

                trace!(empty_reads, "Empty read, backing off");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break CopyStop::Cancelled,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }

            empty_reads = 0;

            // Count each partial write so a cancel mid-chunk reports what landed.
            let mut written = 0;
            while written < read {
                let n = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = destination.write(&buffer[written..read]) => match result {
                        Ok(0) => {
                            debug!("Destination accepted no bytes");
                            return Ok(CopyStop::DestinationClosed);
                        }
                        Ok(n) => n,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) if is_destination_closed(&e) => {
                            debug!(error = %e, "Destination closed");
                            return Ok(CopyStop::DestinationClosed);
                        }
                        Err(e) => return Err(CopyError::Write(e)),
                    },
                };
                written += n;
                state.transferred += n as u64;
                state.notify_started();
            }

            if written < read {
                break CopyStop::Cancelled;
            }
        };

        if stop != CopyStop::Cancelled {
            if let Err(e) = destination.flush().await {
                if is_destination_closed(&e) {
                    return Ok(CopyStop::DestinationClosed);
                }
                return Err(CopyError::Write(e));
            }
        }

        Ok(stop)
    }

    /// Copies the whole source.
    pub async fn copy_to_end<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        cancel: &CancellationToken,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.copy(source, destination, cancel, CopyOptions::new())
            .await
    }

    /// Copies exactly `length` bytes, or fewer if the source ends first.
    pub async fn copy_exact<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        length: u64,
        cancel: &CancellationToken,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.copy(
            source,
            destination,
            cancel,
            CopyOptions::new().with_max_bytes(length),
        )
        .await
    }

    /// Copies until `limit` consecutive reads come back empty.
    pub async fn copy_with_empty_read_limit<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.copy(
            source,
            destination,
            cancel,
            CopyOptions::new().with_empty_read_limit(limit),
        )
        .await
    }

    /// Follows a growing source until `cancel` fires.
    pub async fn tail_until_cancelled<R, W>(
        &self,
        source: &mut R,
        destination: &mut W,
        cancel: &CancellationToken,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.copy(
            source,
            destination,
            cancel,
            CopyOptions::new().tail_until_cancelled(),
        )
        .await
    }

    /// Copies the whole source, calling `on_started` once the first bytes land.
    pub async fn copy_with_start_notification<R, W, F>(
        &self,
        source: &mut R,
        destination: &mut W,
        cancel: &CancellationToken,
        on_started: F,
    ) -> Result<CopyOutcome, CopyError>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        self.copy(
            source,
            destination,
            cancel,
            CopyOptions::new().on_first_bytes(on_started),
        )
        .await
    }
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self::with_defaults()
    }
}
