//! Raw OS steps of the daemonization protocol.
//!
//! Each helper wraps exactly one system call (or one short sequence of them)
//! and reports failure as a `DaemonError`; ordering is decided by the caller.

use crate::error::{DaemonError, DaemonResult};
use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::path::Path;

/// Parent id of a process that has already been re-parented to init.
pub const INIT_PID: libc::pid_t = 1;

/// Highest descriptor closed when the limit cannot be queried.
const FALLBACK_MAX_FD: libc::c_int = 1024;

/// Result of a fork, seen from the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent(libc::pid_t),
    Child,
}

pub fn parent_pid() -> libc::pid_t {
    unsafe { libc::getppid() }
}

/// Builds a signal set holding exactly `signals`.
pub fn signal_set(signals: &[libc::c_int]) -> DaemonResult<libc::sigset_t> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) < 0 {
            return Err(DaemonError::last_syscall("sigemptyset"));
        }
        for &sig in signals {
            if libc::sigaddset(set.as_mut_ptr(), sig) < 0 {
                return Err(DaemonError::last_syscall("sigaddset"));
            }
        }
        Ok(set.assume_init())
    }
}

/// Blocks delivery of `signals` for the calling thread.
///
/// The daemon is single threaded, so this is the process mask.
pub fn block_signals(signals: &[libc::c_int]) -> DaemonResult<()> {
    let set = signal_set(signals)?;
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(DaemonError::SyscallError {
            call: "pthread_sigmask",
            errno: rc,
        });
    }
    Ok(())
}

/// Returns the calling thread's current signal mask.
pub fn current_signal_mask() -> DaemonResult<libc::sigset_t> {
    let mut mask = MaybeUninit::<libc::sigset_t>::uninit();
    let rc =
        unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), mask.as_mut_ptr()) };
    if rc != 0 {
        return Err(DaemonError::SyscallError {
            call: "pthread_sigmask",
            errno: rc,
        });
    }
    Ok(unsafe { mask.assume_init() })
}

#[cfg(test)]
pub fn is_blocked(mask: &libc::sigset_t, sig: libc::c_int) -> bool {
    unsafe { libc::sigismember(mask, sig) == 1 }
}

pub fn perform_fork() -> DaemonResult<Fork> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(DaemonError::last_syscall("fork"))
    } else if pid > 0 {
        Ok(Fork::Parent(pid))
    } else {
        Ok(Fork::Child)
    }
}

/// Sets the file-creation mask, returning the previous one.
pub fn set_umask(mask: u32) -> u32 {
    unsafe { libc::umask(mask as libc::mode_t) as u32 }
}

pub fn new_session() -> DaemonResult<libc::pid_t> {
    let sid = unsafe { libc::setsid() };
    if sid < 0 {
        return Err(DaemonError::last_syscall("setsid"));
    }
    Ok(sid)
}

/// Closes every descriptor the process could have inherited, down to 0.
pub fn close_all_descriptors() {
    #[cfg(target_os = "linux")]
    {
        let rc = unsafe { libc::syscall(libc::SYS_close_range, 0u32, u32::MAX, 0u32) };
        if rc == 0 {
            return;
        }
    }

    let max = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
        n if n > 0 => n.min(libc::c_int::MAX as libc::c_long) as libc::c_int,
        _ => FALLBACK_MAX_FD,
    };
    for fd in (0..=max).rev() {
        unsafe { libc::close(fd) };
    }
}

/// Points stdin, stdout and stderr at the null device.
pub fn redirect_standard_streams() -> DaemonResult<()> {
    let path = CString::new("/dev/null").map_err(|_| {
        DaemonError::Io(io::Error::new(io::ErrorKind::InvalidInput, "Invalid null device path"))
    })?;
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(DaemonError::Io(io::Error::last_os_error()));
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if fd != target && unsafe { libc::dup2(fd, target) } < 0 {
            return Err(DaemonError::Io(io::Error::last_os_error()));
        }
    }

    if fd > libc::STDERR_FILENO {
        unsafe { libc::close(fd) };
    }
    Ok(())
}

pub fn change_directory(path: &Path) -> DaemonResult<()> {
    std::env::set_current_dir(path).map_err(|source| DaemonError::WorkingDirectory {
        path: path.to_path_buf(),
        source,
    })
}
