//! Append-only event log.
//!
//! Every remedial action, aux-pool cleanup, upgrade phase, and alert
//! delivery leaves one JSON line here. `status` tails the most recent
//! entries so an operator can reconstruct what the watchdog did and why.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::epoch_secs;

/// Category of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Check,
    Restart,
    Rollback,
    AuxCleanup,
    Alert,
    Snapshot,
    Upgrade,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Check => "check",
            EventKind::Restart => "restart",
            EventKind::Rollback => "rollback",
            EventKind::AuxCleanup => "aux_cleanup",
            EventKind::Alert => "alert",
            EventKind::Snapshot => "snapshot",
            EventKind::Upgrade => "upgrade",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Epoch seconds.
    pub ts: u64,
    pub kind: EventKind,
    /// Free-form outcome tag ("recovered", "still_down", "ok", "failed", …).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub message: String,
}

impl EventRecord {
    #[must_use]
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            ts: epoch_secs(),
            kind,
            outcome: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }
}

/// Append-only JSONL event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Failures here are logged but never propagate into
    /// the action path — losing a log line must not abort a recovery.
    pub fn append(&self, record: &EventRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append event");
        }
    }

    fn try_append(&self, record: &EventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The last `n` events, oldest first. Unparseable lines are skipped.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<EventRecord> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        let records: Vec<EventRecord> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = records.len().saturating_sub(n);
        records.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_tail() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path().join("events.jsonl"));

        for i in 0..5 {
            log.append(&EventRecord::new(EventKind::Check, format!("check {i}")));
        }

        let tail = log.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].message, "check 2");
        assert_eq!(tail[2].message, "check 4");
    }

    #[test]
    fn tail_of_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path().join("events.jsonl"));
        assert!(log.tail(10).is_empty());
    }

    #[test]
    fn outcome_is_preserved() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::new(tmp.path().join("events.jsonl"));
        log.append(&EventRecord::new(EventKind::Restart, "restart issued").with_outcome("recovered"));

        let tail = log.tail(1);
        assert_eq!(tail[0].kind, EventKind::Restart);
        assert_eq!(tail[0].outcome.as_deref(), Some("recovered"));
    }

    #[test]
    fn unparseable_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let log = EventLog::new(&path);
        log.append(&EventRecord::new(EventKind::Check, "good"));
        fs::write(
            &path,
            format!("{}garbage line\n", fs::read_to_string(&path).unwrap()),
        )
        .unwrap();
        log.append(&EventRecord::new(EventKind::Check, "also good"));

        let tail = log.tail(10);
        assert_eq!(tail.len(), 2);
    }
}
