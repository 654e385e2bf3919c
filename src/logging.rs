//! Plain-text run log
//!
//! Complements `tracing` console output with an append-only file that keeps
//! one line per run milestone across sessions.

use chrono::Local;
use lazy_static::lazy_static;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
    static ref LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
}

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

/// Open (or create) the log file. `data_dir` overrides the platform data dir.
pub fn init_logger(data_dir: Option<&Path>) -> anyhow::Result<()> {
    let log_path = match data_dir {
        Some(dir) => dir.join("prism.log"),
        None => default_log_path(),
    };

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let _ = writeln!(file, "\n=== Prism Session Started at {} ===\n", timestamp);

    if let Ok(mut log_file) = LOG_FILE.lock() {
        *log_file = Some(file);
    }
    if let Ok(mut path) = LOG_PATH.lock() {
        *path = Some(log_path);
    }

    Ok(())
}

/// Echo DEBUG lines to stderr as well
pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

fn default_log_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("prism").join("prism.log"),
        None => PathBuf::from("prism.log"),
    }
}

/// Log a message to file
pub fn log(level: &str, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let formatted = format!("[{}] {}: {}", timestamp, level, message);

    if level == "DEBUG" && is_debug_mode() {
        eprintln!("{}", formatted);
    }

    if let Ok(mut log_file) = LOG_FILE.lock() {
        if let Some(ref mut f) = *log_file {
            let _ = writeln!(f, "{}", formatted);
            let _ = f.flush();
        }
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log("DEBUG", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log("ERROR", &format!($($arg)*));
    };
}

/// Current log file path for display
pub fn get_log_path_display() -> String {
    LOG_PATH
        .lock()
        .ok()
        .and_then(|p| p.clone())
        .unwrap_or_else(default_log_path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        init_logger(Some(dir.path())).unwrap();

        crate::log_info!("run {} started", 7);
        crate::log_error!("run {} failed", 7);

        let content = std::fs::read_to_string(dir.path().join("prism.log")).unwrap();
        assert!(content.contains("Prism Session Started"));
        assert!(content.contains("INFO: run 7 started"));
        assert!(content.contains("ERROR: run 7 failed"));
        assert!(get_log_path_display().ends_with("prism.log"));
    }
}
