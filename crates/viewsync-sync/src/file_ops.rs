//! Mirror file operations with a single bounded retry
//!
//! [`FileOperations`] is the seam between the router and the disk. The
//! [`LocalFileOps`] adapter uses `tokio::fs`; tests substitute their own
//! implementation to inject transient failures.
//!
//! [`RetryingFileOps`] wraps any implementation with a fixed two-attempt
//! policy: an I/O failure on the first attempt is followed by one sleep of
//! the configured delay and exactly one more attempt. A second I/O failure
//! becomes [`FileOpError::Exhausted`]. Anything that is not an I/O failure
//! is returned immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mapper::is_anchor_dir;

/// Which mirror operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Copy,
    Delete,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOp::Copy => write!(f, "copy"),
            FileOp::Delete => write!(f, "delete"),
        }
    }
}

/// Errors raised by mirror file operations
#[derive(Debug, Error)]
pub enum FileOpError {
    /// An I/O failure; considered transient and retried once
    #[error("{op} '{path}': {source}")]
    Io {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path cannot be operated on at all (e.g. it has no parent)
    #[error("invalid path: {0}")]
    InvalidPath(PathBuf),

    /// The retry also failed
    #[error("{op} '{path}' failed after 2nd try: {source}")]
    Exhausted {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileOpError {
    fn io(op: FileOp, path: &Path, source: std::io::Error) -> Self {
        FileOpError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if the failure warrants the one retry
    pub fn is_transient(&self) -> bool {
        matches!(self, FileOpError::Io { .. })
    }
}

// ============================================================================
// FileOperations port
// ============================================================================

/// Single-attempt copy and delete against the destination tree
#[async_trait::async_trait]
pub trait FileOperations: Send + Sync {
    /// Creates `dest`'s parent folders and overwrites `dest` with `source`
    async fn copy_file(&self, source: &Path, dest: &Path) -> Result<(), FileOpError>;

    /// Removes `dest`, then its parent folder if that is left empty
    ///
    /// The parent is never removed when it is a `Views` folder, and only one
    /// level is collapsed.
    async fn delete_file(&self, dest: &Path) -> Result<(), FileOpError>;
}

/// [`FileOperations`] on the real filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalFileOps;

impl LocalFileOps {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl FileOperations for LocalFileOps {
    #[tracing::instrument(level = "debug", skip_all, fields(source = %source.display(), dest = %dest.display()))]
    async fn copy_file(&self, source: &Path, dest: &Path) -> Result<(), FileOpError> {
        let parent = dest
            .parent()
            .ok_or_else(|| FileOpError::InvalidPath(dest.to_path_buf()))?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FileOpError::io(FileOp::Copy, dest, e))?;

        let bytes = tokio::fs::copy(source, dest)
            .await
            .map_err(|e| FileOpError::io(FileOp::Copy, source, e))?;

        debug!(bytes, "copy complete");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(dest = %dest.display()))]
    async fn delete_file(&self, dest: &Path) -> Result<(), FileOpError> {
        tokio::fs::remove_file(dest)
            .await
            .map_err(|e| FileOpError::io(FileOp::Delete, dest, e))?;
        debug!("file removed");

        if let Some(parent) = dest.parent() {
            if !is_anchor_dir(parent) {
                remove_dir_if_empty(parent).await;
            }
        }
        Ok(())
    }
}

/// Best-effort removal of an empty folder.
///
/// The file itself is already gone, so failing here must not turn the
/// delete into an error (a retry would then fail on the missing file).
async fn remove_dir_if_empty(dir: &Path) {
    let is_empty = match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(err) => {
            debug!(dir = %dir.display(), error = %err, "Cannot list parent folder");
            return;
        }
    };

    if !is_empty {
        return;
    }

    // Another task may have created a file here since the listing.
    match tokio::fs::remove_dir(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "Removed empty folder"),
        Err(err) => debug!(dir = %dir.display(), error = %err, "Folder not removed"),
    }
}

// ============================================================================
// RetryingFileOps
// ============================================================================

/// Mirror operations with the fixed two-attempt retry policy
#[derive(Clone)]
pub struct RetryingFileOps {
    ops: Arc<dyn FileOperations>,
}

impl std::fmt::Debug for RetryingFileOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFileOps").finish_non_exhaustive()
    }
}

impl Default for RetryingFileOps {
    fn default() -> Self {
        Self::new(Arc::new(LocalFileOps::new()))
    }
}

impl RetryingFileOps {
    pub fn new(ops: Arc<dyn FileOperations>) -> Self {
        Self { ops }
    }

    /// Copies `source` over `dest`, retrying once after `retry_delay`
    pub async fn copy(
        &self,
        source: &Path,
        dest: &Path,
        retry_delay: Duration,
    ) -> Result<(), FileOpError> {
        with_single_retry(FileOp::Copy, dest, retry_delay, || {
            self.ops.copy_file(source, dest)
        })
        .await
    }

    /// Deletes `dest`, retrying once after `retry_delay`
    pub async fn delete(&self, dest: &Path, retry_delay: Duration) -> Result<(), FileOpError> {
        with_single_retry(FileOp::Delete, dest, retry_delay, || {
            self.ops.delete_file(dest)
        })
        .await
    }
}

/// Runs `f`, and on a transient failure sleeps `delay` and runs it once more
///
/// The sleep only suspends the calling task; no lock is held across it.
async fn with_single_retry<F, Fut>(
    op: FileOp,
    path: &Path,
    delay: Duration,
    f: F,
) -> Result<(), FileOpError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), FileOpError>>,
{
    let first = match f().await {
        Ok(()) => return Ok(()),
        Err(err) if err.is_transient() => err,
        Err(err) => return Err(err),
    };

    warn!(
        operation = %op,
        path = %path.display(),
        delay_ms = delay.as_millis() as u64,
        error = %first,
        "Transient error, retrying once"
    );
    tokio::time::sleep(delay).await;

    match f().await {
        Ok(()) => {
            info!(operation = %op, path = %path.display(), "Operation succeeded after retry");
            Ok(())
        }
        Err(FileOpError::Io { op, path, source }) => {
            Err(FileOpError::Exhausted { op, path, source })
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use tempfile::TempDir;
    use tokio::time::Instant;

    use super::*;

    /// Fails the first `failures` calls with a sharing-violation style error
    struct FlakyOps {
        failures: AtomicU32,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FlakyOps {
        fn failing(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }

        fn attempt(&self, op: FileOp, path: &Path) -> Result<(), FileOpError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(FileOpError::io(
                    op,
                    path,
                    std::io::Error::new(ErrorKind::PermissionDenied, "file is locked"),
                ));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl FileOperations for FlakyOps {
        async fn copy_file(&self, _source: &Path, dest: &Path) -> Result<(), FileOpError> {
            self.attempt(FileOp::Copy, dest)
        }

        async fn delete_file(&self, dest: &Path) -> Result<(), FileOpError> {
            self.attempt(FileOp::Delete, dest)
        }
    }

    /// Always fails with a non-I/O error
    struct InvalidOps {
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl FileOperations for InvalidOps {
        async fn copy_file(&self, _source: &Path, dest: &Path) -> Result<(), FileOpError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(FileOpError::InvalidPath(dest.to_path_buf()))
        }

        async fn delete_file(&self, dest: &Path) -> Result<(), FileOpError> {
            self.copy_file(dest, dest).await
        }
    }

    // ------------------------------------------------------------------
    // Retry policy
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_one_transient_failure() {
        let flaky = Arc::new(FlakyOps::failing(1));
        let ops = RetryingFileOps::new(flaky.clone());
        let delay = Duration::from_millis(2000);

        ops.copy(Path::new("/src/a"), Path::new("/dst/a"), delay)
            .await
            .expect("second attempt succeeds");

        let attempts = flaky.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_second_attempt() {
        let flaky = Arc::new(FlakyOps::failing(5));
        let ops = RetryingFileOps::new(flaky.clone());

        let err = ops
            .delete(Path::new("/dst/a"), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, FileOpError::Exhausted { op: FileOp::Delete, .. }));
        assert!(err.to_string().contains("failed after 2nd try"));
        assert_eq!(flaky.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_no_retry() {
        let flaky = Arc::new(FlakyOps::failing(0));
        let ops = RetryingFileOps::new(flaky.clone());

        ops.copy(Path::new("/src/a"), Path::new("/dst/a"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(flaky.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_non_io_failure_is_not_retried() {
        let invalid = Arc::new(InvalidOps {
            attempts: AtomicU32::new(0),
        });
        let ops = RetryingFileOps::new(invalid.clone());

        let err = ops
            .copy(Path::new("/a"), Path::new("/b"), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, FileOpError::InvalidPath(_)));
        assert_eq!(invalid.attempts.load(Ordering::SeqCst), 1);
    }

    // ------------------------------------------------------------------
    // LocalFileOps
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_copy_creates_parents_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.cshtml");
        let dest = dir.path().join("out/Views/Home/a.cshtml");
        let ops = LocalFileOps::new();

        std::fs::write(&src, b"first").unwrap();
        ops.copy_file(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");

        std::fs::write(&src, b"second").unwrap();
        ops.copy_file(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let ops = LocalFileOps::new();

        let err = ops
            .copy_file(&dir.path().join("nope.cshtml"), &dir.path().join("out/x.cshtml"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_delete_removes_empty_parent() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("Views/Home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("a.cshtml"), b"x").unwrap();

        LocalFileOps::new()
            .delete_file(&home.join("a.cshtml"))
            .await
            .unwrap();

        assert!(!home.exists());
        assert!(dir.path().join("Views").exists());
    }

    #[tokio::test]
    async fn test_delete_keeps_non_empty_parent() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("Views/Home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join("a.cshtml"), b"x").unwrap();
        std::fs::write(home.join("b.cshtml"), b"y").unwrap();

        LocalFileOps::new()
            .delete_file(&home.join("a.cshtml"))
            .await
            .unwrap();

        assert!(home.join("b.cshtml").exists());
    }

    #[tokio::test]
    async fn test_delete_never_removes_views_folder() {
        let dir = TempDir::new().unwrap();
        let views = dir.path().join("Views");
        std::fs::create_dir_all(&views).unwrap();
        std::fs::write(views.join("_ViewStart.cshtml"), b"x").unwrap();

        LocalFileOps::new()
            .delete_file(&views.join("_ViewStart.cshtml"))
            .await
            .unwrap();

        assert!(views.exists());
    }

    #[tokio::test]
    async fn test_delete_collapses_only_one_level() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("Views/Area/Sub");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("a.cshtml"), b"x").unwrap();

        LocalFileOps::new()
            .delete_file(&deep.join("a.cshtml"))
            .await
            .unwrap();

        assert!(!deep.exists());
        assert!(dir.path().join("Views/Area").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let err = LocalFileOps::new()
            .delete_file(&dir.path().join("Views/gone.cshtml"))
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::Io { op: FileOp::Delete, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_local_copy_of_missing_source_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let ops = RetryingFileOps::default();

        let err = ops
            .copy(
                &dir.path().join("missing.cshtml"),
                &dir.path().join("Views/missing.cshtml"),
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FileOpError::Exhausted { op: FileOp::Copy, .. }));
    }
}
