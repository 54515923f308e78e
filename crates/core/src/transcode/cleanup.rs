//! Deletion of partial encoder output.

use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::config::CleanupConfig;
use super::error::{CleanupError, FileFailure};
use super::traits::{DeleteOutcome, FileSystem};
use super::types::TranscodingJobType;
use crate::metrics;

/// How partial output cleanup ended.
#[derive(Debug)]
pub enum CleanupOutcome {
    /// Deletion was not requested.
    Skipped,
    /// All matching files are gone.
    Completed { attempts: u32, deleted: usize },
    /// The retry budget ran out.
    Exhausted {
        attempts: u32,
        last_error: CleanupError,
    },
}

impl CleanupOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Skipped => 0,
            Self::Completed { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Deletes the output of a job, retrying per `config`.
///
/// Waits `initial_delay` before the first attempt so the encoder can release
/// its handles. Never fails; an exhausted budget is logged and reported.
pub async fn delete_partial_output(
    fs: &dyn FileSystem,
    output_path: &Path,
    job_type: TranscodingJobType,
    config: &CleanupConfig,
) -> CleanupOutcome {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        tokio::time::sleep(config.delay_before(attempt)).await;

        match delete_output(fs, output_path, job_type).await {
            Ok(deleted) => {
                info!(
                    path = %output_path.display(),
                    deleted,
                    attempts = attempt,
                    "Deleted partial transcoding output"
                );
                return CleanupOutcome::Completed {
                    attempts: attempt,
                    deleted,
                };
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    path = %output_path.display(),
                    attempts = attempt,
                    error = %e,
                    "Giving up deleting partial transcoding output"
                );
                metrics::CLEANUP_FAILURES.inc();
                return CleanupOutcome::Exhausted {
                    attempts: attempt,
                    last_error: e,
                };
            }
            Err(e) => {
                debug!(
                    path = %output_path.display(),
                    attempt,
                    error = %e,
                    "Partial output deletion failed, retrying"
                );
            }
        }
    }
}

/// One deletion pass. Returns the number of files deleted.
pub async fn delete_output(
    fs: &dyn FileSystem,
    output_path: &Path,
    job_type: TranscodingJobType,
) -> Result<usize, CleanupError> {
    if job_type.is_progressive() {
        return match fs.delete_file(output_path).await {
            Ok(DeleteOutcome::Deleted) => Ok(1),
            Ok(DeleteOutcome::NotFound) => Ok(0),
            Err(error) => Err(CleanupError::DeleteFailed {
                path: output_path.to_path_buf(),
                failures: vec![FileFailure {
                    path: output_path.to_path_buf(),
                    error,
                }],
            }),
        };
    }

    delete_segments(fs, output_path).await
}

/// Deletes every file next to `output_path` whose name contains its stem.
async fn delete_segments(fs: &dyn FileSystem, output_path: &Path) -> Result<usize, CleanupError> {
    let dir = match output_path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => return Ok(0),
    };
    let Some(stem) = output_path.file_stem().map(|s| s.to_string_lossy().to_lowercase()) else {
        return Ok(0);
    };

    let files = match fs.list_files(dir, false).await {
        Ok(files) => files,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(CleanupError::ListFailed {
                dir: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut deleted = 0;
    let mut failures = Vec::new();

    let matching = files.into_iter().filter(|file| {
        file.file_name()
            .is_some_and(|name| name.to_string_lossy().to_lowercase().contains(&stem))
    });

    for file in matching {
        match fs.delete_file(&file).await {
            Ok(DeleteOutcome::Deleted) => {
                debug!(path = %file.display(), "Deleted segment");
                deleted += 1;
            }
            Ok(DeleteOutcome::NotFound) => {}
            Err(error) => failures.push(FileFailure { path: file, error }),
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(CleanupError::DeleteFailed {
            path: output_path.to_path_buf(),
            failures,
        })
    }
}

/// Deletes every file under `dir`. Failures are logged and skipped.
///
/// Returns the number of files deleted.
pub async fn sweep_directory(fs: &dyn FileSystem, dir: &Path) -> usize {
    let files = match fs.list_files(dir, true).await {
        Ok(files) => files,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Transcode directory does not exist, nothing to sweep");
            return 0;
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list transcode directory");
            return 0;
        }
    };

    let mut deleted = 0;
    for file in files {
        match fs.delete_file(&file).await {
            Ok(DeleteOutcome::Deleted) => deleted += 1,
            Ok(DeleteOutcome::NotFound) => {}
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Failed to delete stale transcode output");
            }
        }
    }

    info!(dir = %dir.display(), deleted, "Swept stale transcode output");
    deleted
}
