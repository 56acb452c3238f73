//! Tracing subscriber setup.
//!
//! Events go to standard error and, optionally, to a log file. The file is
//! reopened in append mode for every event: daemonization closes every
//! inherited descriptor, so a handle opened up front would not survive it.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Default log file, next to the PID file.
pub const DEFAULT_LOG_FILE: &str = "/tmp/licchatd/licchat.log";

/// Where log events are written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_owned(),
            file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

/// Writer that appends to `path`, or discards when the file cannot be opened.
fn append_to(path: PathBuf) -> impl Fn() -> Box<dyn Write> + Send + Sync + 'static {
    move || match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Box::new(file) as Box<dyn Write>,
        Err(_) => Box::new(io::sink()),
    }
}

fn make_writer(config: &LogConfig) -> BoxMakeWriter {
    match &config.file {
        Some(path) => BoxMakeWriter::new(io::stderr.and(append_to(path.clone()))),
        None => BoxMakeWriter::new(io::stderr),
    }
}

/// Installs the global subscriber.
pub fn init(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer(config))
        .with_ansi(false)
        .try_init()
}
