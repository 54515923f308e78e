//! Per-output-path mutual exclusion.
//!
//! Each path maps to an async mutex created on first use. The map entry counts
//! holders and waiters and is removed when the last of them goes away, including
//! a waiter whose future is dropped before it got the lock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Mutex<HashMap<PathBuf, LockEntry>>;

struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    refs: usize,
}

/// Keyed locks over output paths.
#[derive(Clone, Default)]
pub struct PathLocks {
    entries: Arc<LockMap>,
}

/// Exclusive hold on an output path. Released on drop.
pub struct PathPermit {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
    _entry: EntryRef,
}

/// Reference on a map entry; drops the entry with the last reference.
struct EntryRef {
    entries: Arc<LockMap>,
    path: PathBuf,
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.path) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.path);
            }
        }
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn reference(&self, path: &Path) -> (Arc<AsyncMutex<()>>, EntryRef) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(path.to_path_buf())
            .or_insert_with(|| LockEntry {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
        entry.refs += 1;

        (
            Arc::clone(&entry.lock),
            EntryRef {
                entries: Arc::clone(&self.entries),
                path: path.to_path_buf(),
            },
        )
    }

    /// Waits until `path` is free and takes it.
    pub async fn acquire(&self, path: impl AsRef<Path>) -> PathPermit {
        let path = path.as_ref();
        let (lock, entry) = self.reference(path);
        let guard = lock.lock_owned().await;
        PathPermit {
            path: path.to_path_buf(),
            _guard: guard,
            _entry: entry,
        }
    }

    /// Takes `path` if nobody holds it.
    pub fn try_acquire(&self, path: impl AsRef<Path>) -> Option<PathPermit> {
        let path = path.as_ref();
        let (lock, entry) = self.reference(path);
        let guard = lock.try_lock_owned().ok()?;
        Some(PathPermit {
            path: path.to_path_buf(),
            _guard: guard,
            _entry: entry,
        })
    }

    /// Whether any holder or waiter references `path`.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.entries.lock().contains_key(path.as_ref())
    }

    /// Number of paths with holders or waiters.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PathLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLocks")
            .field("paths", &self.len())
            .finish()
    }
}

impl PathPermit {
    /// The path this permit holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for PathPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPermit")
            .field("path", &self.path)
            .finish()
    }
}
