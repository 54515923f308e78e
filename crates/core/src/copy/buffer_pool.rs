//! Reusable byte buffers for copy operations.
//!
//! Buffers are handed out as [`PooledBuffer`] guards which put the buffer back
//! into the pool when dropped, so every exit path of a copy (early return, error,
//! cancellation, unwinding) returns its memory.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Statistics for buffer pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Number of new buffer allocations.
    pub allocations: u64,
    /// Number of buffers served from the pool.
    pub reuses: u64,
    /// Buffers currently idle in the pool.
    pub idle: usize,
    /// Buffers currently checked out.
    pub checked_out: usize,
}

/// Thread-safe pool of `Vec<u8>` buffers.
#[derive(Debug)]
pub struct BufferPool {
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    checked_out: AtomicUsize,
}

impl BufferPool {
    /// Creates a pool that keeps at most `max_idle` returned buffers.
    pub fn new(max_idle: usize) -> Self {
        Self {
            max_idle,
            idle: Mutex::new(Vec::new()),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            checked_out: AtomicUsize::new(0),
        }
    }

    /// Checks out a buffer of exactly `len` bytes.
    ///
    /// A pooled buffer with enough capacity is reused when available, otherwise
    /// a new one is allocated.
    pub fn acquire(&self, len: usize) -> PooledBuffer<'_> {
        let reused = {
            let mut idle = self.idle.lock();
            idle.iter()
                .position(|buf| buf.capacity() >= len)
                .map(|pos| idle.swap_remove(pos))
        };

        let mut buffer = match reused {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                debug!(len, "Buffer pool empty, allocating new buffer");
                Vec::with_capacity(len)
            }
        };
        buffer.resize(len, 0);

        self.checked_out.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        }
    }

    fn release(&self, mut buffer: Vec<u8>) {
        self.checked_out.fetch_sub(1, Ordering::Relaxed);
        buffer.clear();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            checked_out: self.checked_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to the byte slice; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
