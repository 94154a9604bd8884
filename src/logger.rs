//! Session logger: a `log` backend writing to a single file.
//!
//! The file is **truncated at each init**, so it only ever contains output
//! from the most recent session.
//!
//! Default location:
//!   Windows:  `%APPDATA%\paintcore\paintcore.log`
//!   Linux:    `~/.local/share/paintcore/paintcore.log`
//!   macOS:    `~/Library/Application Support/paintcore/paintcore.log`
//!
//! Use the `log` macros anywhere in the crate. Warnings and errors are also
//! echoed to stderr, and panics are mirrored into the file by a hook.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
static LOGGER: SessionLogger = SessionLogger;
static PANIC_HOOK: Once = Once::new();

struct SessionLogger;

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] [{}] {}", timestamp(), record.level(), record.args());
        if record.level() <= Level::Warn {
            eprintln!("{}", line);
        }
        write_line(&line);
    }

    fn flush(&self) {
        if let Ok(mut guard) = LOG_FILE.lock() {
            if let Some(file) = guard.as_mut() {
                let _ = file.flush();
            }
        }
    }
}

/// Write a raw line to the session log. I/O errors are ignored so that
/// logging never takes the process down.
pub fn write_line(line: &str) {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Start a session log at `path` and route the `log` facade to it.
///
/// * Routes the facade to the session logger at `level`.
/// * Creates (or truncates) the log file.
/// * Installs a panic hook that writes the panic message to the log before
///   running the previous handler.
pub fn init(path: &Path, level: LevelFilter) -> std::io::Result<()> {
    // Installed first so warnings still reach stderr when the file fails.
    // A second init only swaps the file.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    write_line(&format!("=== paintcore session started (unix {}) ===", unix_seconds()));
    write_line(&format!("Log file: {}", path.display()));

    PANIC_HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            write_line(&format!("[{}] [PANIC] {}", timestamp(), info));
            prev(info);
        }));
    });
    Ok(())
}

/// `<data dir>/paintcore/paintcore.log`.
pub fn default_log_path() -> PathBuf {
    data_dir().join("paintcore").join("paintcore.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// `HH:MM:SS` within the current UTC day.
fn timestamp() -> String {
    let secs = unix_seconds();
    format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_log_is_truncated_and_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old session\n").unwrap();

        init(&path, LevelFilter::Info).unwrap();
        log::info!("tile cache warmed");
        log::debug!("not recorded");
        log::logger().flush();

        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("old session"));
        assert!(text.contains("[INFO] tile cache warmed"));
        assert!(!text.contains("not recorded"));
    }

    #[test]
    fn timestamp_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 8);
        assert_eq!(&ts[2..3], ":");
        assert!(default_log_path().ends_with("paintcore/paintcore.log"));
    }
}
