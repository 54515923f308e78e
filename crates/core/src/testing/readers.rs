//! Scripted async readers for copy engine tests.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Serves `data` in reads of at most `chunk` bytes.
#[derive(Debug)]
pub struct ChunkedReader {
    data: Vec<u8>,
    chunk: usize,
    pos: usize,
    bytes_read: Arc<AtomicU64>,
}

impl ChunkedReader {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            chunk,
            pos: 0,
            bytes_read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of bytes handed out, readable after the reader is moved.
    pub fn bytes_read_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_read)
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let remaining = self.data.len() - self.pos;
        let n = remaining.min(self.chunk).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        self.bytes_read.fetch_add(n as u64, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Returns scripted chunks, then zero-length reads forever.
///
/// An empty chunk in the script is a zero-length read.
#[derive(Debug, Default)]
pub struct StallingReader {
    script: VecDeque<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl StallingReader {
    /// A reader that never produces data.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Vec<u8>>) -> Self {
        Self {
            script: script.into(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of completed reads, readable after the reader is moved.
    pub fn reads_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

impl AsyncRead for StallingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(chunk) = self.script.pop_front() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk[..n]);
        }
        Poll::Ready(Ok(()))
    }
}
