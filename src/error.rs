use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for the daemon lifecycle.
/// Provides specific details about why daemonization failed.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Standard IO errors (writing the PID, opening the null device, etc.)
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// The builder was given paths that cannot work.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Specific system call failure (fork, setsid, sigprocmask).
    #[error("Syscall '{call}' failed with errno {errno}")]
    SyscallError { call: &'static str, errno: i32 },

    /// The run directory could not be entered.
    #[error("Could not change working directory to {}: {source}", .path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The PID lock file could not be opened or created.
    #[error("Could not open PID lock file {}: {source}", .path.display())]
    LockFileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The PID lock file is already locked by another instance.
    #[error("Could not lock PID lock file {}, daemon is already running", .path.display())]
    TargetLocked { path: PathBuf },

    /// Registering a signal handler failed.
    #[error("Signal registration failed: {0}")]
    Signal(#[source] io::Error),
}

impl DaemonError {
    /// Builds a `SyscallError` from the current `errno`.
    pub(crate) fn last_syscall(call: &'static str) -> Self {
        DaemonError::SyscallError {
            call,
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

/// A specialized Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_locked_names_the_path() {
        let err = DaemonError::TargetLocked {
            path: PathBuf::from("/tmp/test/app.pid"),
        };
        assert_eq!(
            err.to_string(),
            "Could not lock PID lock file /tmp/test/app.pid, daemon is already running"
        );
    }

    #[test]
    fn syscall_error_formats_call_and_errno() {
        let err = DaemonError::SyscallError { call: "setsid", errno: 1 };
        assert_eq!(err.to_string(), "Syscall 'setsid' failed with errno 1");
    }

    #[test]
    fn io_error_keeps_its_source() {
        use std::error::Error as _;
        let err: DaemonError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
    }
}
