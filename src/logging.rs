use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Global log file path protected by Mutex
///
/// When None, logs go to stdout.
pub static LOG_FILE: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

/// Severity tag written in front of each message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Logs an informational message from the control path
pub fn log(message: &str) {
    log_with_worker(Level::Info, message, None)
}

/// Logs a message at the given level
pub fn log_at(level: Level, message: &str) {
    log_with_worker(level, message, None)
}

/// Logs a message with timestamp, level and optional worker ID
///
/// Workers tag their lines so interleaved per-file progress stays readable.
/// Write failures are swallowed: logging never fails a transfer.
pub fn log_with_worker(level: Level, message: &str, worker_id: Option<usize>) {
    let _ = write_line(&format_line(level, message, worker_id));
}

fn format_line(level: Level, message: &str, worker_id: Option<usize>) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match worker_id {
        Some(wid) => format!("{} {} [W{}] {}\n", timestamp, level.tag(), wid, message),
        None => format!("{} {} {}\n", timestamp, level.tag(), message),
    }
}

fn write_line(line: &str) -> io::Result<()> {
    let guard = LOG_FILE.lock().unwrap_or_else(|p| p.into_inner());
    match &*guard {
        Some(log_file) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            file.write_all(line.as_bytes())
        }
        None => {
            let mut out = io::stdout().lock();
            out.write_all(line.as_bytes())
        }
    }
}

/// Sets the path for the log file
///
/// Subsequent log calls append to this file instead of stdout.
pub fn set_log_file<P: AsRef<Path>>(path: P) {
    let path_str = path.as_ref().to_string_lossy().into_owned();
    *LOG_FILE.lock().unwrap_or_else(|p| p.into_inner()) = Some(path_str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn test_log_to_file() {
        *LOG_FILE.lock().unwrap() = None;

        let dir = tempdir().unwrap();
        let log_file_path = dir.path().join("test.log");

        set_log_file(&log_file_path);
        log("test message 1");
        log_with_worker(Level::Warn, "test message 2", Some(7));

        let log_contents = fs::read_to_string(&log_file_path).unwrap();
        assert!(log_contents.contains("INFO test message 1"));
        assert!(log_contents.contains("WARN [W7] test message 2"));

        *LOG_FILE.lock().unwrap() = None;
    }

    #[test]
    fn test_format_line_without_worker() {
        let line = format_line(Level::Error, "boom", None);
        assert!(line.ends_with(" ERROR boom\n"));
        assert!(!line.contains("[W"));
    }
}
