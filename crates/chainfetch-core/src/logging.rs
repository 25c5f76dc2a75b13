//! Logging init: `tracing` to a file under the XDG state dir, or stderr.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,chainfetch=debug,chainfetch_core=debug";

/// `~/.local/state/chainfetch`, created on demand. Shared with the run store.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("chainfetch")?;
    let dir = xdg_dirs.get_state_home().join("chainfetch");
    fs::create_dir_all(&dir).with_context(|| format!("create state dir {}", dir.display()))?;
    Ok(dir)
}

/// Appends to the log file; falls back to stderr for a single write batch if
/// the handle could not be cloned.
enum LogSink {
    File(fs::File),
    Stderr,
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(f) => f.write(buf),
            LogSink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(f) => f.flush(),
            LogSink::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct LogFile(fs::File);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(LogSink::File)
            .unwrap_or(LogSink::Stderr)
    }
}

/// `RUST_LOG` wins; otherwise the crate default, raised to `trace` when verbose.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,chainfetch=trace,chainfetch_core=trace")
        } else {
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }
    })
}

/// Initialize structured logging to `~/.local/state/chainfetch/chainfetch.log`.
/// Returns Err if the log file cannot be opened so the caller can use [`init_logging_stderr`].
pub fn init_logging(verbose: bool) -> Result<PathBuf> {
    let log_file_path = state_dir()?.join("chainfetch.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
        .with_context(|| format!("open log file {}", log_file_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(BoxMakeWriter::new(LogFile(file)))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {e}"))?;

    tracing::info!(path = %log_file_path.display(), "chainfetch logging initialized");
    Ok(log_file_path)
}

/// Initialize logging to stderr only (no file).
pub fn init_logging_stderr(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
