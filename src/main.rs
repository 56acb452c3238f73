//! licchatd - detaches, locks its PID file and idles until told to stop.
//!
//! Usage:
//!   licchatd [--run-dir <dir>] [--pid-file <path>] [--log-file <path>] [-f]

use clap::Parser;
use licchatd::logging::{self, LogConfig, DEFAULT_LOG_FILE};
use licchatd::{Daemon, DaemonError, DEFAULT_NAME, DEFAULT_PID_FILE, DEFAULT_RUN_DIRECTORY};
use std::path::PathBuf;
use std::process::exit;

#[derive(Debug, Parser)]
#[command(name = "licchatd", version, about = "Single-instance background daemon")]
struct Args {
    /// Name used in log output
    #[arg(long, env = "LICCHATD_NAME", default_value = DEFAULT_NAME)]
    name: String,

    /// Directory the daemon runs in
    #[arg(long, env = "LICCHATD_RUN_DIR", default_value = DEFAULT_RUN_DIRECTORY)]
    run_dir: PathBuf,

    /// PID lock file
    #[arg(long, env = "LICCHATD_PID_FILE", default_value = DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Log file, appended to
    #[arg(long, env = "LICCHATD_LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Log to standard error only
    #[arg(long)]
    no_log_file: bool,

    /// Log filter directives, overridden by RUST_LOG
    #[arg(long, env = "LICCHATD_LOG", default_value = "info")]
    log_level: String,

    /// Stay attached to the terminal
    #[arg(short, long)]
    foreground: bool,
}

fn main() {
    let args = Args::parse();

    let log_config = LogConfig {
        level: args.log_level.clone(),
        file: (!args.no_log_file).then(|| args.log_file.clone()),
    };
    if let Err(err) = logging::init(&log_config) {
        eprintln!("failed to initialise logging: {}", err);
        exit(libc::EXIT_FAILURE);
    }

    tracing::info!("Daemon is starting up");

    let controller = match Daemon::new()
        .name(&args.name)
        .working_directory(&args.run_dir)
        .pid_file(&args.pid_file)
        .foreground(args.foreground)
        .build()
        .and_then(Daemon::start)
    {
        Ok(controller) => controller,
        Err(err) => fail(err),
    };

    tracing::info!(name = %controller.name(), pid = std::process::id(), "Daemon running");

    if let Err(err) = controller.run() {
        fail(err);
    }
    exit(libc::EXIT_SUCCESS);
}

fn fail(err: DaemonError) -> ! {
    match &err {
        DaemonError::LockFileOpen { path, .. } => {
            tracing::error!("Could not open PID lock file {}, exiting", path.display())
        }
        DaemonError::TargetLocked { path } => {
            tracing::error!("Could not lock PID lock file {}, exiting", path.display())
        }
        _ => tracing::error!("{}", err),
    }
    exit(libc::EXIT_FAILURE);
}
