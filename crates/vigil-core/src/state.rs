//! Durable watchdog state.
//!
//! A single mutable record survives process restarts between check cycles.
//! It is an explicitly injected [`StateStore`] dependency with a
//! load-at-start, persist-at-end discipline; there is no in-memory
//! singleton. Field writes are last-write-wins — every field is derived
//! from the most recent check, and only one invocation writes at a time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Overall service status as seen by the most recent check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Recovered,
    RolledBack,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Recovered => "recovered",
            ServiceStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remedial action the watchdog can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemedialAction {
    None,
    Restart,
    Rollback,
}

impl RemedialAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RemedialAction::None => "none",
            RemedialAction::Restart => "restart",
            RemedialAction::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for RemedialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete problem observed during one check. Multiple may co-occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    ProcessDown,
    HttpDown,
    TelegramErrors,
    ResourceWarn,
    ResourceCrit,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCode::ProcessDown => "process_down",
            IssueCode::HttpDown => "http_down",
            IssueCode::TelegramErrors => "telegram_errors",
            IssueCode::ResourceWarn => "resource_warn",
            IssueCode::ResourceCrit => "resource_crit",
        }
    }
}

impl std::str::FromStr for IssueCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "process_down" => Ok(IssueCode::ProcessDown),
            "http_down" => Ok(IssueCode::HttpDown),
            "telegram_errors" => Ok(IssueCode::TelegramErrors),
            "resource_warn" => Ok(IssueCode::ResourceWarn),
            "resource_crit" => Ok(IssueCode::ResourceCrit),
            _ => Err(format!("unknown issue code: {s}")),
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The singleton state record. Mutated by the check cycle and the
/// recovery actuator; read by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogState {
    pub status: ServiceStatus,
    pub consecutive_failures: u32,
    /// Epoch seconds of the last healthy check.
    pub last_healthy_at: Option<u64>,
    /// Epoch seconds of the last check of any outcome.
    pub last_check_at: Option<u64>,
    /// Issues observed during the last check.
    #[serde(default)]
    pub last_issues: Vec<IssueCode>,
    pub last_action: RemedialAction,
    /// Updated together with `last_action`.
    pub last_action_at: Option<u64>,
    pub last_alert_at: Option<u64>,
    pub last_warn_alert_at: Option<u64>,
    /// Last time the auxiliary process pool was force-restarted.
    pub last_resource_cleanup_at: Option<u64>,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            status: ServiceStatus::Healthy,
            consecutive_failures: 0,
            last_healthy_at: None,
            last_check_at: None,
            last_issues: Vec::new(),
            last_action: RemedialAction::None,
            last_action_at: None,
            last_alert_at: None,
            last_warn_alert_at: None,
            last_resource_cleanup_at: None,
        }
    }
}

impl WatchdogState {
    /// Record a remedial action. Keeps `last_action` and `last_action_at`
    /// consistent — callers never set them separately.
    pub fn record_action(&mut self, action: RemedialAction, now: u64) {
        self.last_action = action;
        self.last_action_at = Some(now);
    }

    /// Reset the failure counter (healthy check or successful recovery).
    pub fn reset_failures(&mut self, now: u64) {
        self.consecutive_failures = 0;
        self.last_healthy_at = Some(now);
    }
}

/// Durable storage for the watchdog state record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store persisting at `path`. Parent directories are created
    /// on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state record. A missing file is a first run; a corrupt
    /// file is logged and treated the same — the watchdog must never be
    /// killed by its own state.
    #[must_use]
    pub fn load(&self) -> WatchdogState {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "state file is corrupt, starting fresh"
                    );
                    WatchdogState::default()
                }
            },
            Err(_) => WatchdogState::default(),
        }
    }

    /// Persist the state record atomically (tmp file + rename).
    pub fn save(&self, state: &WatchdogState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Current time as epoch seconds.
#[must_use]
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_default() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let state = store.load();
        assert_eq!(state.status, ServiceStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_action, RemedialAction::None);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));

        let mut state = WatchdogState::default();
        state.status = ServiceStatus::Unhealthy;
        state.consecutive_failures = 2;
        state.last_issues = vec![IssueCode::HttpDown, IssueCode::TelegramErrors];
        state.record_action(RemedialAction::Restart, 1000);
        store.save(&state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.status, ServiceStatus::Unhealthy);
        assert_eq!(loaded.consecutive_failures, 2);
        assert_eq!(loaded.last_action, RemedialAction::Restart);
        assert_eq!(loaded.last_action_at, Some(1000));
        assert_eq!(
            loaded.last_issues,
            vec![IssueCode::HttpDown, IssueCode::TelegramErrors]
        );
    }

    #[test]
    fn corrupt_file_loads_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        let state = StateStore::new(&path).load();
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn record_action_sets_both_fields() {
        let mut state = WatchdogState::default();
        state.record_action(RemedialAction::Rollback, 42);
        assert_eq!(state.last_action, RemedialAction::Rollback);
        assert_eq!(state.last_action_at, Some(42));
    }

    #[test]
    fn issue_code_roundtrip() {
        for code in [
            IssueCode::ProcessDown,
            IssueCode::HttpDown,
            IssueCode::TelegramErrors,
            IssueCode::ResourceWarn,
            IssueCode::ResourceCrit,
        ] {
            let s = code.as_str();
            let parsed: IssueCode = s.parse().unwrap();
            assert_eq!(parsed, code);
            assert_eq!(code.to_string(), s);
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceStatus::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
    }
}
