//! # licchatd
//!
//! A minimal Unix daemon scaffold. It detaches from the controlling terminal,
//! guarantees a single running instance through an exclusive lock on its PID
//! file, and stays resident until it receives an interrupt or terminate
//! signal.
//!
//! ```no_run
//! use licchatd::Daemon;
//!
//! let controller = Daemon::new()
//!     .working_directory("/tmp/licchatd/")
//!     .pid_file("/tmp/licchatd/licchat.pid")
//!     .build()?
//!     .start()?;
//! controller.run()?;
//! # Ok::<(), licchatd::DaemonError>(())
//! ```

#[cfg(not(unix))]
compile_error!("licchatd only supports Unix targets");

mod daemon;
mod error;
pub mod logging;
pub mod pidfile;
pub mod signals;
mod sys;

// Re-export public types to keep the API flat
pub use daemon::{
    Controller, Daemon, DEFAULT_NAME, DEFAULT_PID_FILE, DEFAULT_RUN_DIRECTORY, DEFAULT_UMASK,
};
pub use error::{DaemonError, DaemonResult};
pub use pidfile::{read_pid, PidLock};
pub use signals::{Disposition, LifecycleState};
