//! In-memory filesystem for testing cleanup.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::transcode::{DeleteOutcome, FileSystem};

/// Mock implementation of [`FileSystem`].
///
/// Holds a flat set of file paths. Deletes of a path can be made to fail a
/// number of times to exercise retry logic.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<RwLock<BTreeSet<PathBuf>>>,
    /// Remaining forced failures per path. `u32::MAX` fails forever.
    failures: Arc<RwLock<HashMap<PathBuf, u32>>>,
    attempts: Arc<RwLock<HashMap<PathBuf, u32>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filesystem holding the given files.
    pub fn with_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let fs = Self::new();
        for file in files {
            fs.add_file(file);
        }
        fs
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.files.write().insert(path.into());
    }

    /// All files still present, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.read().iter().cloned().collect()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.read().contains(path.as_ref())
    }

    /// Fail the next `times` deletes of `path` with a sharing violation.
    pub fn fail_deletes(&self, path: impl Into<PathBuf>, times: u32) {
        self.failures.write().insert(path.into(), times);
    }

    /// Number of delete calls made for `path`.
    pub fn delete_attempts(&self, path: impl AsRef<Path>) -> u32 {
        self.attempts
            .read()
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, path: &Path) -> bool {
        let mut failures = self.failures.write();
        let Some(remaining) = failures.get_mut(path) else {
            return false;
        };
        match *remaining {
            0 => false,
            u32::MAX => true,
            _ => {
                *remaining -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl FileSystem for MockFileSystem {
    async fn delete_file(&self, path: &Path) -> io::Result<DeleteOutcome> {
        *self.attempts.write().entry(path.to_path_buf()).or_insert(0) += 1;

        if self.take_failure(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is in use by another process",
            ));
        }

        if self.files.write().remove(path) {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn list_files(&self, dir: &Path, recursive: bool) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .read()
            .iter()
            .filter(|file| {
                if recursive {
                    file.starts_with(dir)
                } else {
                    file.parent() == Some(dir)
                }
            })
            .cloned()
            .collect())
    }
}
