//! Single-instance enforcement through an advisory lock on the PID file.

use crate::error::{DaemonError, DaemonResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Permissions the lock file is created with.
pub const PID_FILE_MODE: u32 = 0o600;

/// An exclusively locked PID file.
///
/// The lock lives exactly as long as this value: dropping or releasing it
/// closes the descriptor, which is what frees the advisory lock. Process exit
/// releases it as well, whatever the cause.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    file: File,
}

impl PidLock {
    /// Opens (creating if absent) and locks `path` without blocking.
    ///
    /// The file is not truncated here: an instance that loses the race must
    /// leave the winner's content alone.
    pub fn acquire(path: &Path) -> DaemonResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(PID_FILE_MODE)
            .open(path)
            .map_err(|source| DaemonError::LockFileOpen {
                path: path.to_path_buf(),
                source,
            })?;

        // LOCK_NB ensures we don't block if another instance is running
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(DaemonError::TargetLocked {
                    path: path.to_path_buf(),
                });
            }
            return Err(DaemonError::SyscallError {
                call: "flock",
                errno: err.raw_os_error().unwrap_or(0),
            });
        }

        Ok(PidLock {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Replaces the file content with `pid` as decimal text and a newline.
    pub fn write_pid(&mut self, pid: u32) -> DaemonResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", pid)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the descriptor, freeing the lock. The file stays on disk.
    pub fn release(self) {
        tracing::debug!(path = %self.path.display(), "releasing PID lock");
        drop(self);
    }
}

/// Reads the PID recorded in `path`, if the file exists and holds one.
pub fn read_pid(path: &Path) -> DaemonResult<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
