//! Append-only audit trail for remote actions.
//!
//! Each record is written with open/write/close under a short-held lock so a
//! crash mid-run never leaves a partially buffered file handle behind.

use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `YYYY-MM-DD HH:MM:SS <event>` line. Write failures are
    /// logged and swallowed; auditing never blocks the action it records.
    pub fn record(&self, event: &str) {
        if !self.enabled {
            return;
        }
        let line = format!("{} {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), event);
        let guard = self.lock.lock().unwrap();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        drop(guard);
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), error = %err, "audit write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new(&path, true);
        log.record("JOB_START id=abc123def456");
        log.record("JOB_COMPLETE id=abc123def456 exit=0");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("JOB_START id=abc123def456"));
        assert!(lines[1].ends_with("JOB_COMPLETE id=abc123def456 exit=0"));
        // "YYYY-MM-DD HH:MM:SS " prefix
        assert_eq!(&lines[0][4..5], "-");
        assert_eq!(&lines[0][13..14], ":");
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::new(&path, false);
        log.record("PUSH_SCRIPT /tmp/x");
        assert!(!path.exists());
    }
}
