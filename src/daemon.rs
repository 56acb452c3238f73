use crate::error::{DaemonError, DaemonResult};
use crate::pidfile::PidLock;
use crate::signals::{signals_with, Disposition, LifecycleState, SignalWatch};
use crate::sys::unix::{self, Fork};
use std::path::{Path, PathBuf};
use std::process::exit;

#[cfg(target_os = "linux")]
use sd_notify::NotifyState;

/// Default daemon name, used for logging.
pub const DEFAULT_NAME: &str = "licchatd";
/// Default run directory.
pub const DEFAULT_RUN_DIRECTORY: &str = "/tmp/licchatd/";
/// Default PID lock file.
pub const DEFAULT_PID_FILE: &str = "/tmp/licchatd/licchat.pid";
/// Default umask: files come out as 750 / 640.
pub const DEFAULT_UMASK: u32 = 0o027;

/// Configures and launches the daemon process.
#[derive(Debug, Clone)]
pub struct Daemon {
    pub(crate) name: String,
    pub(crate) directory: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) umask: u32,
    pub(crate) foreground: bool,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Creates a new default configuration.
    ///
    /// # Defaults
    /// - Name: `licchatd`
    /// - Working directory: `/tmp/licchatd/`
    /// - PID file: `/tmp/licchatd/licchat.pid`
    /// - Umask: `0o027`
    /// - Detach into the background
    pub fn new() -> Self {
        Daemon {
            name: DEFAULT_NAME.to_owned(),
            directory: PathBuf::from(DEFAULT_RUN_DIRECTORY),
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            umask: DEFAULT_UMASK,
            foreground: false,
        }
    }

    // --- Public Getters ---

    /// Returns the daemon name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Returns the configured PID file path.
    pub fn pid_file_path(&self) -> &Path {
        &self.pid_file
    }

    pub fn working_directory_path(&self) -> &Path {
        &self.directory
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    // --- Builder Methods ---

    /// Sets the name the daemon logs under.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Sets the path to the PID file.
    /// This file is locked to ensure only one instance runs.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Sets the directory the daemon changes into.
    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.directory = path.into();
        self
    }

    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = mask;
        self
    }

    /// If `true`, stays attached: no fork, no new session, stdio untouched.
    pub fn foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    /// Validates configuration without starting the daemon.
    pub fn build(self) -> DaemonResult<Self> {
        if !self.directory.is_absolute() {
            return Err(DaemonError::Config(format!(
                "run directory {} is not absolute",
                self.directory.display()
            )));
        }
        if !self.directory.is_dir() {
            return Err(DaemonError::Config(format!(
                "run directory {} does not exist",
                self.directory.display()
            )));
        }
        if !self.pid_file.is_absolute() {
            return Err(DaemonError::Config(format!(
                "PID file {} is not absolute",
                self.pid_file.display()
            )));
        }
        if self.pid_file.parent().map(|p| !p.is_dir()).unwrap_or(true) {
            return Err(DaemonError::Config(format!(
                "PID file directory for {} does not exist",
                self.pid_file.display()
            )));
        }
        Ok(self)
    }

    /// Runs the daemonization protocol.
    ///
    /// In the background mode the invoking process prints the child's PID and
    /// exits with status 0 inside this call; only the detached child returns.
    /// A process already re-parented to init returns an idle controller
    /// without touching anything.
    pub fn start(self) -> DaemonResult<Controller> {
        let supervised = under_service_manager();
        if supervised || self.foreground {
            return self.start_attached(supervised);
        }

        if unix::parent_pid() == unix::INIT_PID {
            tracing::debug!("parent is init, already detached");
            return Ok(Controller::detached(self.name));
        }

        self.start_background()
    }

    fn start_background(self) -> DaemonResult<Controller> {
        unix::block_signals(&signals_with(Disposition::Ignored))?;
        let signals = SignalWatch::install()?;

        if let Fork::Parent(child) = unix::perform_fork()? {
            tracing::info!("Child process created: {}", child);
            println!("Child process created: {}", child);
            exit(0);
        }

        unix::set_umask(self.umask);
        unix::new_session()?;
        unix::close_all_descriptors();
        unix::redirect_standard_streams()?;
        tracing::debug!("detached from terminal");

        self.finish(signals, false)
    }

    fn start_attached(self, supervised: bool) -> DaemonResult<Controller> {
        unix::block_signals(&signals_with(Disposition::Ignored))?;
        let signals = SignalWatch::install()?;
        unix::set_umask(self.umask);
        self.finish(signals, supervised)
    }

    /// Shared tail: working directory, lock, PID.
    fn finish(self, signals: SignalWatch, supervised: bool) -> DaemonResult<Controller> {
        unix::change_directory(&self.directory)?;

        let mut lock = PidLock::acquire(&self.pid_file)?;
        lock.write_pid(std::process::id())?;
        tracing::debug!(path = %self.pid_file.display(), "PID file locked");

        if supervised {
            notify(&[NotifyState::Ready]);
        }

        Ok(Controller {
            name: self.name,
            lock: Some(lock),
            signals: Some(signals),
            state: LifecycleState::Running,
            supervised,
        })
    }
}

/// Owns everything a running daemon holds and drives it until termination.
#[derive(Debug)]
pub struct Controller {
    name: String,
    lock: Option<PidLock>,
    signals: Option<SignalWatch>,
    state: LifecycleState,
    supervised: bool,
}

impl Controller {
    fn detached(name: String) -> Self {
        Controller {
            name,
            lock: None,
            signals: None,
            state: LifecycleState::Running,
            supervised: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether this controller holds the PID lock.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn pid_file_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(PidLock::path)
    }

    /// Applies one signal to the state machine, releasing the lock when asked
    /// to shut down.
    ///
    /// The controller never reports `Terminated` itself: that state is only
    /// reached by the process exiting after [`run`](Self::run) returns.
    pub fn handle_signal(&mut self, sig: libc::c_int) -> LifecycleState {
        self.state = self.state.on_signal(sig);
        if self.state == LifecycleState::ShuttingDown {
            self.shutdown();
        }
        self.state
    }

    /// Blocks until an interrupt or terminate signal has been handled.
    pub fn run(mut self) -> DaemonResult<()> {
        let signals = match self.signals.take() {
            Some(signals) => signals,
            None => SignalWatch::install()?,
        };

        while self.state == LifecycleState::Running {
            let sig = signals.wait();
            tracing::debug!(signal = %crate::signals::signal_name(sig), "signal delivered");
            self.handle_signal(sig);
        }
        Ok(())
    }

    /// Releases the PID lock. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(lock) = self.lock.take() {
            if self.supervised {
                notify(&[NotifyState::Stopping]);
            }
            lock.release();
        }
    }
}

#[cfg(target_os = "linux")]
fn under_service_manager() -> bool {
    // If NOTIFY_SOCKET is present, systemd expects us to stay in the foreground
    std::env::var_os("NOTIFY_SOCKET").is_some()
}

#[cfg(not(target_os = "linux"))]
fn under_service_manager() -> bool {
    false
}

#[cfg(target_os = "linux")]
fn notify(states: &[NotifyState]) {
    if let Err(err) = sd_notify::notify(false, states) {
        tracing::warn!("service manager notification failed: {}", err);
    }
}

#[cfg(not(target_os = "linux"))]
fn notify(_states: &[NotifyState]) {}

#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
enum NotifyState {
    Ready,
    Stopping,
}
