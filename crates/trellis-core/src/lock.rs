use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failure to take the ref lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process kept the lock for the whole timeout.
    #[error("ref lock {} still held after {waited:?}", .path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("ref lock: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StorageIo,
        }
    }
}

/// RAII guard for the exclusive lock held while a ref is compared and
/// replaced. Released on drop.
#[derive(Debug)]
pub struct RefLock {
    file: File,
    path: PathBuf,
}

impl RefLock {
    /// Acquire an exclusive advisory lock on `path`, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another holder keeps the lock for
    /// longer than `timeout`, or [`LockError::Io`] if the lock file cannot be
    /// created.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if file.try_lock_exclusive().is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                let waited = start.elapsed();
                tracing::warn!(path = %path.display(), ?waited, "ref lock timed out");
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn release(self) {
        drop(self);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
