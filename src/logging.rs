//! Logging setup for the binary
//!
//! The logger is installed before the configuration is loaded so that load
//! diagnostics are not lost. The configured level and log file are applied
//! once the configuration is known.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use eyre::{Context, Result};
use log::LevelFilter;

/// Log sink writing to stderr until a log file is attached.
#[derive(Clone, Default)]
pub struct LogTarget {
    file: Arc<Mutex<Option<File>>>,
}

impl LogTarget {
    /// Send all further output to `path`, creating its directory if needed.
    pub fn attach_file(&self, path: &Path) -> Result<()> {
        if let Some(log_dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("Failed to open log file")?;
        *self.file.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
        Ok(())
    }
}

impl Write for LogTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            Some(file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            Some(file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}

/// Whether `RUST_LOG` takes over filtering from the configuration.
fn env_filter_set() -> bool {
    std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some()
}

/// Effective level: `--verbose` wins, then the configured level, then info.
pub fn resolve_level(configured: Option<&str>, verbose: bool) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    match configured.map(str::parse::<LevelFilter>) {
        Some(Ok(level)) => level,
        Some(Err(_)) => {
            log::warn!(
                "Unknown log level \"{}\", using info",
                configured.unwrap_or_default()
            );
            LevelFilter::Info
        }
        None => LevelFilter::Info,
    }
}

/// Install the logger. Until [`apply()`] runs, output goes to stderr at info
/// (debug with `--verbose`), or as `RUST_LOG` directs.
pub fn setup_logging(verbose: bool) -> Result<LogTarget> {
    let target = LogTarget::default();
    let mut builder = if env_filter_set() {
        env_logger::Builder::from_default_env()
    } else {
        // Filtering is left to the global max level so it can change later.
        let mut builder = env_logger::Builder::new();
        builder.filter_level(LevelFilter::Trace);
        builder
    };
    builder.target(env_logger::Target::Pipe(Box::new(target.clone())));
    builder.try_init().context("Logger already initialized")?;

    if !env_filter_set() {
        log::set_max_level(resolve_level(None, verbose));
    }
    Ok(target)
}

/// Apply the configured level and log file.
pub fn apply(
    target: &LogTarget,
    log_level: Option<&str>,
    log_file: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    if !env_filter_set() {
        log::set_max_level(resolve_level(log_level, verbose));
    }

    match log_file {
        Some(path) => {
            target.attach_file(path)?;
            log::info!("Logging initialized, writing to: {}", path.display());
        }
        None => log::info!("Logging initialized"),
    }
    Ok(())
}
