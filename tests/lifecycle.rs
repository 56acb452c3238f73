//! Drives the real binary through detach, lock, signal and shutdown.

use licchatd::{read_pid, DaemonError, PidLock};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

struct Layout {
    dir: tempfile::TempDir,
}

impl Layout {
    fn new() -> Self {
        Layout {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn pid_file(&self) -> PathBuf {
        self.dir.path().join("app.pid")
    }

    fn log_file(&self) -> PathBuf {
        self.dir.path().join("app.log")
    }

    fn command(&self) -> Command {
        self.command_in(self.dir.path())
    }

    fn command_in(&self, run_dir: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_licchatd"));
        cmd.arg("--run-dir")
            .arg(run_dir)
            .arg("--pid-file")
            .arg(self.pid_file())
            .arg("--log-file")
            .arg(self.log_file())
            .env_remove("NOTIFY_SOCKET")
            .env_remove("RUST_LOG");
        cmd
    }

    fn log(&self) -> String {
        std::fs::read_to_string(self.log_file()).unwrap_or_default()
    }
}

/// Sends SIGTERM on drop so a failing test never leaks a daemon.
struct Running {
    pid: libc::pid_t,
    pid_file: PathBuf,
}

impl Drop for Running {
    fn drop(&mut self) {
        if lock_is_held(&self.pid_file) {
            unsafe { libc::kill(self.pid, libc::SIGTERM) };
        }
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

fn lock_is_held(path: &Path) -> bool {
    matches!(PidLock::acquire(path), Err(DaemonError::TargetLocked { .. }))
}

fn child_pid(output: &Output) -> libc::pid_t {
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Child process created: "))
        .and_then(|pid| pid.trim().parse().ok())
        .unwrap_or_else(|| panic!("no child pid in {:?}", stdout))
}

/// Starts a background daemon and waits until it holds the lock.
fn start_daemon(layout: &Layout) -> Running {
    let output = layout.command().output().unwrap();
    assert!(output.status.success(), "launcher failed: {:?}", output);
    let pid = child_pid(&output);
    let daemon = Running {
        pid,
        pid_file: layout.pid_file(),
    };

    assert!(
        wait_for(|| read_pid(&layout.pid_file()).ok().flatten() == Some(pid as u32)),
        "PID file never appeared"
    );
    assert!(lock_is_held(&layout.pid_file()));
    daemon
}

#[test]
fn detaches_and_records_its_pid() {
    let layout = Layout::new();
    let daemon = start_daemon(&layout);

    let content = std::fs::read_to_string(layout.pid_file()).unwrap();
    assert_eq!(content, format!("{}\n", daemon.pid));
    assert!(wait_for(|| layout.log().contains("Daemon running")));

    #[cfg(target_os = "linux")]
    {
        let proc_dir = PathBuf::from(format!("/proc/{}", daemon.pid));

        for fd in 0..=2 {
            let target = std::fs::read_link(proc_dir.join("fd").join(fd.to_string())).unwrap();
            assert_eq!(target, Path::new("/dev/null"), "fd {} not redirected", fd);
        }

        // Nothing inherited survives: only stdio and the lock file stay open.
        let extra: Vec<PathBuf> = std::fs::read_dir(proc_dir.join("fd"))
            .unwrap()
            .map(|entry| entry.unwrap())
            .filter(|entry| entry.file_name().to_string_lossy().parse::<u32>().unwrap() > 2)
            .map(|entry| std::fs::read_link(entry.path()).unwrap())
            .collect();
        let pid_file = std::fs::canonicalize(layout.pid_file()).unwrap();
        assert_eq!(extra, vec![pid_file]);

        // Fields after the command name: state, ppid, pgrp, session.
        let stat = std::fs::read_to_string(proc_dir.join("stat")).unwrap();
        let fields: Vec<&str> = stat[stat.rfind(')').unwrap() + 1..]
            .split_whitespace()
            .collect();
        let pid = daemon.pid.to_string();
        assert_eq!(fields[2], pid, "not a process group leader");
        assert_eq!(fields[3], pid, "not a session leader");
    }
}

#[test]
fn second_instance_cannot_take_the_lock() {
    let layout = Layout::new();
    let _daemon = start_daemon(&layout);
    let before = std::fs::read_to_string(layout.pid_file()).unwrap();

    let status = layout.command().arg("--foreground").status().unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));

    // In the background the launcher still exits 0; the child logs and dies.
    let output = layout.command().output().unwrap();
    assert!(output.status.success());
    assert!(wait_for(|| layout.log().matches("Could not lock PID lock file").count() >= 2));

    assert_eq!(std::fs::read_to_string(layout.pid_file()).unwrap(), before);
    assert!(lock_is_held(&layout.pid_file()));
}

#[test]
fn terminate_releases_the_lock() {
    let layout = Layout::new();
    let daemon = start_daemon(&layout);

    unsafe { libc::kill(daemon.pid, libc::SIGTERM) };
    assert!(wait_for(|| !lock_is_held(&layout.pid_file())));
    assert!(wait_for(|| layout.log().contains("Daemon exiting")));
    assert!(layout.pid_file().exists());
}

#[test]
fn hangup_and_job_control_signals_are_survived() {
    let layout = Layout::new();
    let daemon = start_daemon(&layout);

    unsafe { libc::kill(daemon.pid, libc::SIGHUP) };
    assert!(wait_for(|| layout.log().contains("Received SIGHUP signal")));

    for sig in [libc::SIGCHLD, libc::SIGTSTP, libc::SIGTTOU, libc::SIGTTIN] {
        unsafe { libc::kill(daemon.pid, sig) };
    }
    thread::sleep(Duration::from_millis(200));
    assert!(lock_is_held(&layout.pid_file()));
    assert!(!layout.log().contains("Daemon exiting"));
}

#[test]
fn interrupt_in_foreground_exits_cleanly() {
    let layout = Layout::new();
    let mut child = layout.command().arg("--foreground").spawn().unwrap();
    let pid = child.id();

    assert!(wait_for(|| read_pid(&layout.pid_file()).ok().flatten() == Some(pid)));
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };

    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
    assert!(!lock_is_held(&layout.pid_file()));
}

#[test]
fn missing_run_directory_fails_before_forking() {
    let layout = Layout::new();
    let output = layout
        .command_in(&layout.dir.path().join("missing"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!layout.pid_file().exists());
}
