//! Per-tunnel event logs
//!
//! Each tunnel owns an append-only log file under the logs directory, one
//! line per supervision event:
//!
//! ```text
//! [2026-08-02 14:03:11] [Restart #3] 🚀 Starting SSH tunnel
//! ```
//!
//! Events are mirrored to the process log through `tracing` so an attached
//! operator sees them without tailing files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::{info, warn};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Append-only event sink for one tunnel.
#[derive(Debug)]
pub struct EventLog {
    tunnel: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (creating if needed) `<log_dir>/<name>.log` for appending.
    pub fn open(log_dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir).map_err(|source| Error::LogOpen {
            path: log_dir.to_path_buf(),
            source,
        })?;
        let path = log_dir.join(format!("{}.log", name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::LogOpen {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            tunnel: name.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one event line, stamped with the current restart count.
    pub fn append(&self, restart_count: u32, message: &str) {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        let line = format!("[{}] [Restart #{}] {}\n", timestamp, restart_count, message);

        // The write is best-effort: a full disk must not take the worker down.
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            warn!("failed to append to {:?}: {}", self.path, e);
        }
        drop(file);

        info!("[{}] {}", self.tunnel, message);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directory_and_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs");
        let log = EventLog::open(&dir, "db-prod").unwrap();
        assert!(dir.exists());
        assert_eq!(log.path(), dir.join("db-prod.log"));
        assert!(log.path().exists());
    }

    #[test]
    fn append_writes_timestamped_lines() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::open(tmp.path(), "web").unwrap();

        log.append(1, "🚀 Starting SSH tunnel");
        log.append(2, "💔 Tunnel died, reconnecting...");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[Restart #1] 🚀 Starting SSH tunnel"));
        assert!(lines[1].contains("[Restart #2] 💔 Tunnel died, reconnecting..."));
        // [YYYY-MM-DD HH:MM:SS] prefix
        assert_eq!(&lines[0][0..1], "[");
        assert_eq!(&lines[0][20..21], "]");
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let tmp = TempDir::new().unwrap();
        {
            let log = EventLog::open(tmp.path(), "db").unwrap();
            log.append(1, "first");
        }
        let log = EventLog::open(tmp.path(), "db").unwrap();
        log.append(2, "second");

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
