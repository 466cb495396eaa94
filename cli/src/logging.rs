//! Tracing subscriber setup: console layer plus an optional append-only log file.
//!
//! The log file is rolled when it is opened: once it reaches
//! [`MAX_LOG_BYTES`] it becomes `dotsnap.log.1`, older backups shift up by
//! one, and at most [`LOG_BACKUPS`] are kept.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _};

/// Console level and (optional) file level for a `-v` count.
///
/// 0: info to the console. 1: debug to the console. 2: also info to the
/// log file. 3 or more: debug to both.
pub fn levels(verbosity: u8) -> (LevelFilter, Option<LevelFilter>) {
    match verbosity {
        0 => (LevelFilter::INFO, None),
        1 => (LevelFilter::DEBUG, None),
        2 => (LevelFilter::DEBUG, Some(LevelFilter::INFO)),
        _ => (LevelFilter::DEBUG, Some(LevelFilter::DEBUG)),
    }
}

/// `<data_dir>/dotsnap/dotsnap.log`
pub fn default_log_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dotsnap")
        .join("dotsnap.log")
}

pub const MAX_LOG_BYTES: u64 = 1024 * 1024;
pub const LOG_BACKUPS: usize = 4;

/// `dotsnap.log` -> `dotsnap.log.<n>`
fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

fn rotate(path: &Path, max_bytes: u64) -> io::Result<()> {
    let oversized = fs::metadata(path).map(|m| m.len() >= max_bytes).unwrap_or(false);
    if !oversized {
        return Ok(());
    }

    let oldest = backup_path(path, LOG_BACKUPS);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..LOG_BACKUPS).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    fs::rename(path, backup_path(path, 1))
}

fn open_log_file(path: &Path) -> io::Result<File> {
    open_capped(path, MAX_LOG_BYTES)
}

fn open_capped(path: &Path, max_bytes: u64) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    rotate(path, max_bytes)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Call once, before any logging.
///
/// `RUST_LOG`, when set, narrows what both layers see.
pub fn init(verbosity: u8, log_file: Option<&Path>) {
    let (console_level, file_level) = levels(verbosity);

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(console_level);

    let mut file_error = None;
    let file_layer = file_level.and_then(|level| {
        let path = log_file.map(Path::to_path_buf).unwrap_or_else(default_log_file);
        match open_log_file(&path) {
            Ok(file) => Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(level),
            ),
            Err(e) => {
                file_error = Some(format!("Cannot open log file {}: {}", path.display(), e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(message) = file_error {
        tracing::warn!("{}", message);
    }
}
