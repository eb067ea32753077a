//! Per-formula advisory locks.
//!
//! One lock file per formula name under the lock root, held with a
//! non-blocking exclusive `flock`. The kernel drops the lock when the
//! holding process exits, so a crash never leaves a live holder behind;
//! the file itself stays and only carries metadata about the last holder.
//!
//! `flock` locks belong to an open file description, so two handles in the
//! same process exclude each other exactly like two processes do.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::persist::escape_name;

const LOCK_SUFFIX: &str = ".formula.lock";

/// Last holder, as written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    /// Holder process id.
    pub pid: u32,
    /// When the lock was taken.
    pub started_at_unix: u64,
    /// What the holder was doing (`install`, `uninstall`, ...).
    pub operation: String,
}

impl fmt::Display for LockMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (PID {}, started at Unix timestamp {})",
            self.operation, self.pid, self.started_at_unix
        )
    }
}

fn holder_suffix(holder: &Option<LockMetadata>) -> String {
    match holder {
        Some(meta) => format!(" by {meta}"),
        None => String::new(),
    }
}

/// Locking failures.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another handle holds the lock.
    #[error(
        "{name} is locked{}: another operation on it is in progress",
        holder_suffix(.holder)
    )]
    Held {
        name: String,
        holder: Option<LockMetadata>,
    },

    /// The lock directory or file could not be used.
    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Hands out lock handles rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockManager {
    root: PathBuf,
}

impl LockManager {
    /// Manager for lock files under `root`. Nothing is created yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lock directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lock file for `name`. Tap-qualified names are percent-escaped.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{LOCK_SUFFIX}", escape_name(name)))
    }

    /// An unacquired handle for `name`.
    pub fn handle(&self, name: &str, operation: &str) -> FormulaLock {
        FormulaLock {
            name: name.to_string(),
            path: self.lock_path(name),
            operation: operation.to_string(),
            file: None,
        }
    }

    /// Take the lock for `name`, failing at once if it is held.
    ///
    /// # Errors
    ///
    /// [`LockError::Held`] on contention, [`LockError::Io`] if the lock file
    /// cannot be created or locked.
    pub fn acquire(&self, name: &str, operation: &str) -> Result<FormulaLock, LockError> {
        let mut handle = self.handle(name, operation);
        handle.lock()?;
        Ok(handle)
    }

    /// Release a handle. Releasing an unheld handle does nothing.
    pub fn release(&self, handle: &mut FormulaLock) {
        handle.unlock();
    }
}

/// A lock handle for one formula. Released on drop.
#[derive(Debug)]
pub struct FormulaLock {
    name: String,
    path: PathBuf,
    operation: String,
    file: Option<File>,
}

impl FormulaLock {
    /// Formula name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Take the lock. A handle that already holds it keeps it.
    ///
    /// # Errors
    ///
    /// See [`LockManager::acquire`].
    pub fn lock(&mut self) -> Result<(), LockError> {
        if self.file.is_some() {
            return Ok(());
        }

        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(io_err)?;

        if let Err(err) = try_lock_exclusive(&file) {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(LockError::Held {
                    name: self.name.clone(),
                    holder: read_holder(&self.path),
                });
            }
            return Err(io_err(err));
        }

        write_metadata(&file, &self.operation).map_err(io_err)?;
        debug!(formula = %self.name, path = %self.path.display(), "lock acquired");

        self.file = Some(file);
        Ok(())
    }

    /// Drop the lock. Does nothing if it is not held.
    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = unlock_file(&file);
            debug!(formula = %self.name, "lock released");
        }
    }

    /// Metadata written by this handle, read through the held descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the handle is not locked or the contents are not valid.
    pub fn read_metadata(&self) -> io::Result<LockMetadata> {
        let mut file = self
            .file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "lock not held"))?;
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(io::Error::other)
    }
}

impl Drop for FormulaLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn write_metadata(file: &File, operation: &str) -> io::Result<()> {
    let metadata = LockMetadata {
        pid: std::process::id(),
        started_at_unix: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        operation: operation.to_string(),
    };

    file.set_len(0)?;
    let mut writer = io::BufWriter::new(file);
    writer.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut writer, &metadata).map_err(io::Error::other)?;
    writer.flush()
}

fn read_holder(path: &Path) -> Option<LockMetadata> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::Unlock)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "formula locks need flock",
    ))
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
    Ok(())
}
