//! Remedial action execution.
//!
//! Executes "restart" or "rollback to snapshot" against the capability
//! interfaces and verifies success over HTTP. Once an action begins there
//! is no interrupt path: long external steps run to completion or natural
//! failure — a half-completed rollback is worse than a slow one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::VigilConfig;
use crate::events::{EventKind, EventLog, EventRecord};
use crate::git::VersionControl;
use crate::pkg::PackageManager;
use crate::probe::http_responsive;
use crate::service::ServiceSupervisor;
use crate::snapshot::SnapshotStore;

/// Result of one remedial action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered,
    StillDown,
    /// Rollback requested with no latest snapshot — a hard precondition
    /// failure, not a best-effort fallback.
    NoSnapshot,
}

impl RecoveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryOutcome::Recovered => "recovered",
            RecoveryOutcome::StillDown => "still_down",
            RecoveryOutcome::NoSnapshot => "no_snapshot",
        }
    }
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executes restarts and rollbacks.
pub struct RecoveryActuator {
    base_url: String,
    config_path: PathBuf,
    restart_timeout: Duration,
    settle_delay: Duration,
    poll_interval: Duration,
    supervisor: Arc<dyn ServiceSupervisor>,
    vcs: Arc<dyn VersionControl>,
    pkg: Arc<dyn PackageManager>,
    snapshots: SnapshotStore,
    events: EventLog,
    http: reqwest::Client,
}

impl RecoveryActuator {
    pub fn new(
        cfg: &VigilConfig,
        supervisor: Arc<dyn ServiceSupervisor>,
        vcs: Arc<dyn VersionControl>,
        pkg: Arc<dyn PackageManager>,
        snapshots: SnapshotStore,
        events: EventLog,
    ) -> Self {
        Self {
            base_url: cfg.service_base_url(),
            config_path: cfg.config_path.clone(),
            restart_timeout: Duration::from_secs(cfg.restart_timeout_secs),
            settle_delay: Duration::from_secs(cfg.rollback_settle_secs),
            poll_interval: Duration::from_secs(1),
            supervisor,
            vcs,
            pkg,
            snapshots,
            events,
            http: reqwest::Client::new(),
        }
    }

    /// Override the recovery timing (tests).
    #[must_use]
    pub fn with_timing(
        mut self,
        restart_timeout: Duration,
        settle_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        self.restart_timeout = restart_timeout;
        self.settle_delay = settle_delay;
        self.poll_interval = poll_interval;
        self
    }

    /// Supervised restart, then poll HTTP health until it answers or the
    /// timeout elapses.
    pub async fn restart(&self) -> RecoveryOutcome {
        tracing::info!(supervisor = self.supervisor.kind(), "restart requested");
        if let Err(e) = self.supervisor.restart().await {
            tracing::error!(error = %e, "restart command failed");
            self.events.append(
                &EventRecord::new(EventKind::Restart, format!("restart command failed: {e}"))
                    .with_outcome(RecoveryOutcome::StillDown.as_str()),
            );
            return RecoveryOutcome::StillDown;
        }

        let outcome = if self.poll_until_healthy(self.restart_timeout).await {
            RecoveryOutcome::Recovered
        } else {
            RecoveryOutcome::StillDown
        };
        self.events.append(
            &EventRecord::new(EventKind::Restart, "service restart")
                .with_outcome(outcome.as_str()),
        );
        outcome
    }

    /// Restore the latest snapshot: checkout its revision, reinstall
    /// dependencies, rebuild if declared, restore the config copy, then a
    /// single health check after a fixed settle delay.
    pub async fn rollback(&self) -> RecoveryOutcome {
        let Some(snapshot) = self.snapshots.latest() else {
            tracing::error!("rollback requested but no snapshot exists");
            self.events.append(
                &EventRecord::new(EventKind::Rollback, "no snapshot available")
                    .with_outcome(RecoveryOutcome::NoSnapshot.as_str()),
            );
            return RecoveryOutcome::NoSnapshot;
        };
        tracing::info!(snapshot = snapshot.id(), "rolling back");

        if let Err(e) = self.supervisor.stop().await {
            // A dead service may fail to stop cleanly; keep going.
            tracing::warn!(error = %e, "stop before rollback failed");
        }

        if let Some(revision) = snapshot.manifest.revision.as_deref() {
            if let Err(e) = self.vcs.checkout(revision).await {
                return self.rollback_failed(&snapshot, format!("checkout failed: {e}"));
            }
        }

        if let Err(e) = self.pkg.install().await {
            return self.rollback_failed(&snapshot, format!("dependency install failed: {e}"));
        }
        if let Err(e) = self.pkg.build().await {
            return self.rollback_failed(&snapshot, format!("build failed: {e}"));
        }

        if let Some(bytes) = snapshot.config_bytes() {
            if let Err(e) = std::fs::write(&self.config_path, bytes) {
                return self.rollback_failed(&snapshot, format!("config restore failed: {e}"));
            }
        }

        if let Err(e) = self.supervisor.start().await {
            return self.rollback_failed(&snapshot, format!("start failed: {e}"));
        }

        // Rollback is the last resort and already slow: one check after a
        // fixed settle delay, not a poll loop.
        tokio::time::sleep(self.settle_delay).await;
        let outcome = if http_responsive(&self.http, &self.base_url).await {
            RecoveryOutcome::Recovered
        } else {
            RecoveryOutcome::StillDown
        };
        self.events.append(
            &EventRecord::new(
                EventKind::Rollback,
                format!("rollback to snapshot {}", snapshot.id()),
            )
            .with_outcome(outcome.as_str()),
        );
        outcome
    }

    fn rollback_failed(
        &self,
        snapshot: &crate::snapshot::Snapshot,
        message: String,
    ) -> RecoveryOutcome {
        tracing::error!(snapshot = snapshot.id(), message, "rollback step failed");
        self.events.append(
            &EventRecord::new(EventKind::Rollback, message)
                .with_outcome(RecoveryOutcome::StillDown.as_str()),
        );
        RecoveryOutcome::StillDown
    }

    async fn poll_until_healthy(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if http_responsive(&self.http, &self.base_url).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
