//! [`Updateable`] backed by a file on local (or trusted shared) disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio_util::sync::CancellationToken;

use super::{StorageError, Updateable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    Shared,
    Exclusive,
}

/// Tracks which advisory lock is held on the sidecar file and releases it on
/// drop, whatever path the read takes out.
struct LockGuard {
    file: File,
    state: LockState,
}

impl LockGuard {
    fn acquire_shared(file: File) -> io::Result<Self> {
        FileExt::try_lock_shared(&file)?;
        Ok(Self {
            file,
            state: LockState::Shared,
        })
    }

    fn upgrade(&mut self) -> io::Result<()> {
        debug_assert_eq!(self.state, LockState::Shared);
        FileExt::try_lock_exclusive(&self.file)?;
        self.state = LockState::Exclusive;
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        if self.state == LockState::Unlocked {
            return Ok(());
        }
        self.state = LockState::Unlocked;
        FileExt::unlock(&self.file)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "Failed to release storage lock");
        }
    }
}

/// A blob stored at `path`, locked through `path.lock`.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
    }

    fn read_contents(&self) -> io::Result<Vec<u8>> {
        match std::fs::read(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Stage next to the target and rename over it, so readers see either
    /// the old or the new contents.
    fn write_contents(&self, contents: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(contents)?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn contention(&self) -> StorageError {
        StorageError::Contention(self.path.display().to_string())
    }
}

impl Updateable for LocalFile {
    fn read(
        &self,
        cancel: &CancellationToken,
        is_expired: &dyn Fn(&[u8]) -> bool,
        update: &dyn Fn(&[u8]) -> Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let lock_file = self.open_lock_file()?;
        let mut guard = match LockGuard::acquire_shared(lock_file) {
            Ok(guard) => guard,
            Err(e) if is_contention(&e) => return Err(self.contention()),
            Err(e) => return Err(e.into()),
        };

        let contents = self.read_contents()?;

        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        if !is_expired(&contents) {
            guard.release()?;
            return Ok(contents);
        }

        match guard.upgrade() {
            Ok(()) => {}
            Err(e) if is_contention(&e) => return Err(self.contention()),
            Err(e) => return Err(e.into()),
        }

        let fresh = update(&contents);
        self.write_contents(&fresh)?;
        guard.release()?;

        tracing::info!(
            path = %self.path.display(),
            previous_bytes = contents.len(),
            bytes = fresh.len(),
            "Refreshed stored blob"
        );
        Ok(fresh)
    }
}

fn is_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
