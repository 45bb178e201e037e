//! Structured file logging for zoneops.
//!
//! Log levels:
//! - ERROR: task launch failures, staging failures, placement refusals
//! - WARN: skipped zones, failed HTTP triggers, non-zero exits
//! - INFO: session lifecycle, phase transitions, command start/finish
//! - DEBUG: planner decisions, collaborator lookups
//! - TRACE: every streamed output line
//!
//! One file is written per day (`zoneops-YYYY-MM-DD.log`) and files beyond
//! the retention count are pruned on init. Debug mode can be enabled with
//! `--debug` or `ZONEOPS_DEBUG=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_DIR: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

const FILE_PREFIX: &str = "zoneops-";
const FILE_SUFFIX: &str = ".log";

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Initialize logging into `dir`, keeping at most `retention` daily files.
pub fn init(dir: &Path, retention: usize, debug: bool) {
    let env_debug = std::env::var("ZONEOPS_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let level = if debug_enabled {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if std::fs::create_dir_all(dir).is_ok() {
        prune(dir, retention);
        LOG_DIR.set(dir.to_path_buf()).ok();
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// File name of the log written on `date`.
pub fn file_name_for(date: chrono::NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, date.format("%Y-%m-%d"), FILE_SUFFIX)
}

/// Remove the oldest daily files so that at most `retention` remain.
fn prune(dir: &Path, retention: usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false)
        })
        .collect();
    if logs.len() <= retention {
        return;
    }
    // Date-stamped names sort chronologically.
    logs.sort();
    let excess = logs.len() - retention;
    for path in logs.into_iter().take(excess) {
        let _ = std::fs::remove_file(path);
    }
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(dir) = LOG_DIR.get() {
        let now = chrono::Local::now();
        let path = dir.join(file_name_for(now.date_naive()));
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = now.format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

/// Log a message at INFO level.
pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at ERROR level.
pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level (only in debug mode).
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log a message at TRACE level.
pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! olog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! olog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! olog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! olog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! olog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
