//! Signal dispositions and the shutdown state machine.
//!
//! Handlers only raise a per-signal flag. The controller blocks in
//! [`SignalWatch::wait`] and turns each delivered signal into a
//! [`LifecycleState`] transition, so no lifecycle logic runs in the
//! signal-handling context.

use crate::error::{DaemonError, DaemonResult};
use crate::sys::unix;
use signal_hook::consts::signal::{SIGCHLD, SIGHUP, SIGINT, SIGTERM, SIGTSTP, SIGTTIN, SIGTTOU};
use signal_hook::SigId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How the daemon treats a given signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignored,
    Handled,
    Default,
}

/// Every signal whose disposition differs from the default.
const DISPOSITIONS: [(libc::c_int, Disposition); 7] = [
    (SIGCHLD, Disposition::Ignored),
    (SIGTSTP, Disposition::Ignored),
    (SIGTTOU, Disposition::Ignored),
    (SIGTTIN, Disposition::Ignored),
    (SIGHUP, Disposition::Handled),
    (SIGINT, Disposition::Handled),
    (SIGTERM, Disposition::Handled),
];

pub fn disposition(sig: libc::c_int) -> Disposition {
    DISPOSITIONS
        .iter()
        .find(|(s, _)| *s == sig)
        .map(|(_, d)| *d)
        .unwrap_or(Disposition::Default)
}

/// Signals that have `wanted` as their disposition, in table order.
pub fn signals_with(wanted: Disposition) -> Vec<libc::c_int> {
    DISPOSITIONS
        .iter()
        .filter(|(_, d)| *d == wanted)
        .map(|(sig, _)| *sig)
        .collect()
}

/// Lifecycle of the running daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    /// Applies a delivered signal.
    ///
    /// Hangup and unrecognised signals are logged and leave the state alone;
    /// interrupt and terminate move a running daemon to `ShuttingDown`.
    pub fn on_signal(self, sig: libc::c_int) -> LifecycleState {
        if self != LifecycleState::Running {
            return self;
        }
        match sig {
            SIGHUP => {
                tracing::warn!("Received SIGHUP signal");
                LifecycleState::Running
            }
            SIGINT | SIGTERM => {
                tracing::info!("Daemon exiting");
                LifecycleState::ShuttingDown
            }
            other => {
                tracing::warn!("Unhandled signal {}", signal_name(other));
                LifecycleState::Running
            }
        }
    }
}

/// Conventional name of `sig`, or its number when unknown.
pub fn signal_name(sig: libc::c_int) -> String {
    signal_hook::low_level::signal_name(sig)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("signal {}", sig))
}

/// Pending-flag handlers for the handled signals plus a race-free wait.
///
/// The handled signals stay blocked except while [`wait`](Self::wait) sits in
/// `sigsuspend`, so a signal can never slip in between checking the flags
/// and going to sleep.
///
/// `signal-hook` installs its handlers with `SA_RESTART`. Nothing here relies
/// on interrupted system calls: `sigsuspend` returns after every handler run
/// regardless of that flag.
pub struct SignalWatch {
    pending: Vec<(libc::c_int, Arc<AtomicBool>)>,
    ids: Vec<SigId>,
    wait_mask: libc::sigset_t,
}

impl std::fmt::Debug for SignalWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWatch")
            .field("signals", &self.pending.iter().map(|(sig, _)| *sig).collect::<Vec<_>>())
            .field("registrations", &self.ids.len())
            .finish()
    }
}

impl SignalWatch {
    /// Installs the handler for hangup, interrupt and terminate.
    pub fn install() -> DaemonResult<Self> {
        let handled = signals_with(Disposition::Handled);
        let mut pending = Vec::with_capacity(handled.len());
        let mut ids = Vec::with_capacity(handled.len());
        for &sig in &handled {
            let flag = Arc::new(AtomicBool::new(false));
            // Registered with SA_RESTART; see the type docs.
            let id = signal_hook::flag::register(sig, Arc::clone(&flag))
                .map_err(DaemonError::Signal)?;
            pending.push((sig, flag));
            ids.push(id);
        }

        unix::block_signals(&handled)?;

        // Suspend with everything currently blocked except the handled set.
        let mut wait_mask = unix::current_signal_mask()?;
        for &sig in &handled {
            if unsafe { libc::sigdelset(&mut wait_mask, sig) } < 0 {
                return Err(DaemonError::last_syscall("sigdelset"));
            }
        }

        Ok(SignalWatch {
            pending,
            ids,
            wait_mask,
        })
    }

    /// Takes one pending signal without blocking.
    pub fn try_next(&self) -> Option<libc::c_int> {
        self.pending
            .iter()
            .find(|(_, flag)| flag.swap(false, Ordering::SeqCst))
            .map(|(sig, _)| *sig)
    }

    /// Blocks until a handled signal has been delivered and returns it.
    pub fn wait(&self) -> libc::c_int {
        loop {
            if let Some(sig) = self.try_next() {
                return sig;
            }
            // Always returns -1/EINTR once a handler has run.
            unsafe { libc::sigsuspend(&self.wait_mask) };
        }
    }
}
