//! # Single-Instance Lock
//!
//! An exclusive, non-blocking advisory lock on a well-known file keeps a
//! second copy of the app from starting. The holder's pid is written into
//! the file so a refused starter can tell a live owner from a stale record.
//!
//! ## Lifecycle:
//! 1. Open (create if missing, never truncate) the lock file
//! 2. Take `flock(LOCK_EX | LOCK_NB)`; on failure report the owner and stop
//! 3. Write our pid
//! 4. On drop, delete the file and release the lock
//!
//! The OS drops the lock when the process dies, including on
//! `process::exit`, so a crash never leaves the lock held.

use crate::error::AppError;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Why the lock could not be taken.
#[derive(Debug)]
pub enum LockError {
    /// Another process holds the lock.
    AlreadyRunning {
        path: PathBuf,
        owner: Option<u32>,
    },
    /// The lock file could not be opened or written.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::AlreadyRunning { path, owner: Some(pid) } => {
                write!(f, "WhisperTrans is already running (pid {}, lock {})", pid, path.display())
            }
            LockError::AlreadyRunning { path, owner: None } => {
                write!(f, "WhisperTrans is already running (lock {})", path.display())
            }
            LockError::Io { path, source } => {
                write!(f, "Cannot use lock file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LockError {}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        AppError::Startup(err.to_string())
    }
}

/// Guard for the held lock. Dropping it releases the lock and removes the file.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Try to become the only running instance.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        if let Err(err) = try_lock_exclusive(&file) {
            tracing::debug!(path = %path.display(), error = %err, "Lock is held elsewhere");
            drop(file);
            return Err(Self::refused(path));
        }

        let pid = std::process::id();
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{}", pid).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        tracing::info!(path = %path.display(), pid, "Instance lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Build the refusal, cleaning up the record when its owner is gone.
    fn refused(path: &Path) -> LockError {
        let owner = read_owner(path);
        if let Some(pid) = owner.filter(|&pid| !process_alive(pid)) {
            tracing::warn!(pid, "Lock owner is no longer running, removing stale lock file");
            if let Err(err) = fs::remove_file(path) {
                tracing::debug!(error = %err, "Stale lock file could not be removed");
            }
        }

        LockError::AlreadyRunning {
            path: path.to_path_buf(),
            owner,
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::debug!(error = %err, "Lock file already gone");
        }
        unlock(&self.file);
        tracing::debug!(path = %self.path.display(), "Instance lock released");
    }
}

/// Pid recorded in the lock file, if it parses.
pub fn read_owner(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and open for the whole call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above; closing the file would release the lock anyway.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

/// Whether a process with this pid exists. `EPERM` means it exists but
/// belongs to someone else.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

// Only unix targets enforce the lock; elsewhere every start succeeds.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}
