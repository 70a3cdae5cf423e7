//! Upgrade pipeline: preflight → snapshot → apply → verify.
//!
//! Each phase aggregates error and warning counts; errors block
//! progression, warnings do not. Mid-pipeline hard failures reverse the
//! version-control update (a failed build escalates to a full rollback);
//! verification findings only *recommend* a rollback — that decision is
//! left to the operator.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{MIN_FREE_DISK_MB, VigilConfig};
use crate::events::{EventKind, EventLog, EventRecord};
use crate::git::VersionControl;
use crate::pkg::PackageManager;
use crate::probe::{free_disk_mb, http_responsive};
use crate::recover::{RecoveryActuator, RecoveryOutcome};
use crate::service::ServiceSupervisor;
use crate::service_config::ServiceConfigView;
use crate::snapshot::{Snapshot, SnapshotStore, read_version, scan_artifacts, scan_symlinks};

/// Commit-message keywords that suggest a breaking incoming change.
const BREAKING_KEYWORDS: &[&str] = &["breaking", "migration", "incompatible", "renamed", "removed"];

/// Seconds the post-upgrade verification polls for service health.
const VERIFY_HEALTH_TIMEOUT_SECS: u64 = 30;

/// Pluggable classifier for breaking-change commit messages.
pub type BreakingChangeFn = fn(&str) -> bool;

/// Case-insensitive match against a fixed keyword list.
#[must_use]
pub fn default_breaking_change(message: &str) -> bool {
    let lower = message.to_lowercase();
    BREAKING_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pluggable artifact-rename hint: given a removed artifact path and the
/// two naming conventions, propose what it may have been renamed to.
pub type RenameHintFn = fn(&str, &str, &str) -> Option<String>;

/// Default hint: swap between the two suffix conventions.
#[must_use]
pub fn suffix_swap_hint(path: &str, suffix: &str, suffix_alt: &str) -> Option<String> {
    if let Some(stem) = path.strip_suffix(suffix) {
        Some(format!("{stem}{suffix_alt}"))
    } else {
        path.strip_suffix(suffix_alt)
            .map(|stem| format!("{stem}{suffix}"))
    }
}

/// Findings of one pipeline phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

impl PhaseReport {
    #[must_use]
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// A phase passes when it produced no errors; warnings do not block.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Aggregate result of `upgrade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeReport {
    pub phases: Vec<PhaseReport>,
    /// Whether the working tree was actually changed.
    pub applied: bool,
    /// Whether a mid-pipeline failure triggered an automatic rollback.
    pub rolled_back: bool,
    pub recommendation: String,
}

impl UpgradeReport {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.phases.iter().map(|p| p.errors.len()).sum()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.phases.iter().map(|p| p.warnings.len()).sum()
    }
}

/// Orchestrates the upgrade phases over the capability interfaces.
pub struct UpgradePipeline {
    cfg: VigilConfig,
    supervisor: Arc<dyn ServiceSupervisor>,
    vcs: Arc<dyn VersionControl>,
    pkg: Arc<dyn PackageManager>,
    snapshots: SnapshotStore,
    events: EventLog,
    actuator: RecoveryActuator,
    is_breaking: BreakingChangeFn,
    rename_hint: RenameHintFn,
    verify_timeout: Duration,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl UpgradePipeline {
    /// Wire the real dependency graph from configuration.
    ///
    /// Unlike the check cycle, upgrade paths hard-require a usable package
    /// manager: detection failure surfaces immediately.
    pub fn from_config(cfg: VigilConfig) -> crate::Result<Self> {
        let supervisor: Arc<dyn ServiceSupervisor> = crate::service::resolve_supervisor(
            &cfg.service_unit,
            &cfg.process_pattern,
            cfg.start_command.clone(),
            &cfg.service_dir,
        )
        .into();
        let vcs: Arc<dyn VersionControl> = Arc::new(crate::git::GitCli::new(
            &cfg.service_dir,
            &cfg.git_remote,
            &cfg.git_branch,
        ));
        let pkg: Arc<dyn PackageManager> = Arc::new(crate::pkg::NodePackageManager::detect(
            &cfg.service_dir,
            cfg.build_command.clone(),
        )?);
        let snapshots = SnapshotStore::new(cfg.snapshots_dir());
        let events = EventLog::new(cfg.events_file());
        let actuator = RecoveryActuator::new(
            &cfg,
            Arc::clone(&supervisor),
            Arc::clone(&vcs),
            Arc::clone(&pkg),
            snapshots.clone(),
            events.clone(),
        );
        Ok(Self::new(
            cfg, supervisor, vcs, pkg, snapshots, events, actuator,
        ))
    }

    pub fn new(
        cfg: VigilConfig,
        supervisor: Arc<dyn ServiceSupervisor>,
        vcs: Arc<dyn VersionControl>,
        pkg: Arc<dyn PackageManager>,
        snapshots: SnapshotStore,
        events: EventLog,
        actuator: RecoveryActuator,
    ) -> Self {
        Self {
            cfg,
            supervisor,
            vcs,
            pkg,
            snapshots,
            events,
            actuator,
            is_breaking: default_breaking_change,
            rename_hint: suffix_swap_hint,
            verify_timeout: Duration::from_secs(VERIFY_HEALTH_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(1),
            http: reqwest::Client::new(),
        }
    }

    /// Swap the breaking-change classifier.
    #[must_use]
    pub fn with_breaking_change_fn(mut self, f: BreakingChangeFn) -> Self {
        self.is_breaking = f;
        self
    }

    /// Swap the artifact-rename hint strategy.
    #[must_use]
    pub fn with_rename_hint(mut self, f: RenameHintFn) -> Self {
        self.rename_hint = f;
        self
    }

    /// Override verification timing (tests).
    #[must_use]
    pub fn with_verify_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.verify_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Phase 1: pre-flight validation. Errors block the upgrade.
    pub async fn preflight(&self) -> PhaseReport {
        let mut report = PhaseReport::new("preflight");

        if self.snapshots.latest().is_none() {
            report.error("no snapshot exists; take one before upgrading");
        }

        match ServiceConfigView::load(&self.cfg.config_path) {
            Ok(_) => report.note("service config parses"),
            Err(e) => report.error(format!("service config: {e}")),
        }

        if self.vcs.is_repo() {
            match self.vcs.is_clean().await {
                Ok(true) => {}
                Ok(false) => report.warn("working tree is dirty"),
                Err(e) => report.warn(format!("could not check working tree: {e}")),
            }
        } else {
            report.error(format!(
                "no version-control checkout at {}",
                self.cfg.service_dir.display()
            ));
        }

        let free = free_disk_mb(&self.cfg.service_dir);
        if free < MIN_FREE_DISK_MB {
            report.warn(format!("only {free} MB free disk (floor {MIN_FREE_DISK_MB} MB)"));
        }

        match read_version(&self.cfg.service_dir.join(&self.cfg.version_file)) {
            Some(version) => report.note(format!("current version {version}")),
            None => report.error("current version is not readable"),
        }

        if http_responsive(&self.http, &self.cfg.service_base_url()).await {
            report.note("service is reachable");
        } else {
            report.warn("service is not reachable");
        }

        if self.vcs.is_repo() {
            match self.vcs.fetch().await {
                Ok(()) => {
                    let behind = self.vcs.commits_behind().await.unwrap_or(0);
                    report.note(format!("{behind} commits behind remote"));
                    if behind > 0 {
                        match self.vcs.incoming_messages().await {
                            Ok(messages) => {
                                for msg in messages.iter().filter(|m| (self.is_breaking)(m)) {
                                    report.warn(format!("possible breaking change: {msg}"));
                                }
                            }
                            Err(e) => report.warn(format!("could not read incoming commits: {e}")),
                        }
                    }
                }
                Err(e) => report.warn(format!("fetch failed: {e}")),
            }
        }

        report
    }

    /// Run the full pipeline. With `dry_run`, stop after preflight.
    pub async fn run(&self, dry_run: bool) -> UpgradeReport {
        let mut phases = Vec::new();

        let preflight = self.preflight().await;
        let blocked = !preflight.passed();
        phases.push(preflight);
        if blocked {
            return self.finish(phases, false, false, "preflight errors block the upgrade");
        }
        if dry_run {
            return self.finish(phases, false, false, "dry run: no changes applied");
        }

        // Always snapshot immediately before mutating, even if one exists,
        // so rollback targets pre-this-upgrade state.
        let mut snap_phase = PhaseReport::new("snapshot");
        let service_up = http_responsive(&self.http, &self.cfg.service_base_url()).await;
        let snapshot = match self
            .snapshots
            .take(&self.cfg, self.vcs.as_ref(), service_up)
            .await
        {
            Ok(snapshot) => {
                snap_phase.note(format!("snapshot {}", snapshot.id()));
                snapshot
            }
            Err(e) => {
                snap_phase.error(format!("snapshot failed: {e}"));
                phases.push(snap_phase);
                return self.finish(phases, false, false, "could not capture rollback material");
            }
        };
        phases.push(snap_phase);

        let (apply, applied, rolled_back) = self.apply(&snapshot).await;
        let apply_failed = !apply.passed();
        phases.push(apply);
        if apply_failed {
            let recommendation = if rolled_back {
                "apply failed; automatic rollback was performed"
            } else {
                "apply failed; working tree was reverted"
            };
            return self.finish(phases, applied, rolled_back, recommendation);
        }

        let verify = self.verify_against(&snapshot).await;
        let verify_failed = !verify.passed();
        phases.push(verify);
        let recommendation = if verify_failed {
            "upgrade may have problems, rollback recommended"
        } else {
            "upgrade verified"
        };
        self.finish(phases, true, false, recommendation)
    }

    /// Phase 3: stop → update to remote head → reinstall → build → start.
    async fn apply(&self, snapshot: &Snapshot) -> (PhaseReport, bool, bool) {
        let mut report = PhaseReport::new("apply");
        let previous = snapshot.manifest.revision.clone();

        if let Err(e) = self.supervisor.stop().await {
            tracing::warn!(error = %e, "stop before upgrade failed");
        }

        let new_revision = match self.vcs.update_to_remote_head().await {
            Ok(rev) => rev,
            Err(e) => {
                report.error(format!("update failed: {e}"));
                self.revert_checkout(previous.as_deref(), &mut report).await;
                let _ = self.supervisor.start().await;
                return (report, false, false);
            }
        };
        report.note(format!("updated to {new_revision}"));

        if let Err(e) = self.pkg.install().await {
            report.error(format!("dependency install failed: {e}"));
            self.revert_checkout(previous.as_deref(), &mut report).await;
            let _ = self.supervisor.start().await;
            return (report, true, false);
        }

        match self.pkg.build().await {
            Ok(ran) => {
                if ran {
                    report.note("build step succeeded");
                }
            }
            Err(e) => {
                // A broken build leaves mixed state behind; only the full
                // rollback path restores a coherent checkout.
                report.error(format!("build failed: {e}"));
                let outcome = self.actuator.rollback().await;
                report.note(format!("automatic rollback: {outcome}"));
                return (report, true, outcome != RecoveryOutcome::NoSnapshot);
            }
        }

        if let Err(e) = self.supervisor.start().await {
            report.error(format!("start after upgrade failed: {e}"));
        }
        (report, true, false)
    }

    async fn revert_checkout(&self, previous: Option<&str>, report: &mut PhaseReport) {
        let Some(revision) = previous else {
            report.warn("no previous revision recorded, cannot revert");
            return;
        };
        match self.vcs.checkout(revision).await {
            Ok(()) => report.note(format!("reverted working tree to {revision}")),
            Err(e) => report.error(format!("revert to {revision} failed: {e}")),
        }
    }

    /// Direct rollback to the latest snapshot, identical to the recovery
    /// actuator's last-resort path.
    pub async fn rollback(&self) -> RecoveryOutcome {
        self.actuator.rollback().await
    }

    /// Phase 4 against the latest snapshot (the independent `verify`
    /// command).
    pub async fn verify(&self) -> PhaseReport {
        match self.snapshots.latest() {
            Some(snapshot) => self.verify_against(&snapshot).await,
            None => {
                let mut report = PhaseReport::new("verify");
                report.error("no snapshot to verify against");
                report
            }
        }
    }

    /// Diff current state against a snapshot and check service health.
    async fn verify_against(&self, snapshot: &Snapshot) -> PhaseReport {
        let mut report = PhaseReport::new("verify");

        let current_artifacts = scan_artifacts(
            &self.cfg.service_dir,
            &self.cfg.artifact_suffix,
            &self.cfg.artifact_suffix_alt,
        );
        for old in &snapshot.manifest.artifacts {
            if !current_artifacts.contains(old) {
                let hint = (self.rename_hint)(
                    old,
                    &self.cfg.artifact_suffix,
                    &self.cfg.artifact_suffix_alt,
                )
                .filter(|candidate| current_artifacts.contains(candidate));
                match hint {
                    Some(candidate) => report.error(format!(
                        "artifact removed: {old} (possibly renamed to {candidate})"
                    )),
                    None => report.error(format!("artifact removed: {old}")),
                }
            }
        }
        for new in &current_artifacts {
            if !snapshot.manifest.artifacts.contains(new) {
                report.note(format!("artifact added: {new}"));
            }
        }

        let view = match ServiceConfigView::load(&self.cfg.config_path) {
            Ok(view) => view,
            Err(e) => {
                report.error(format!("service config: {e}"));
                ServiceConfigView::default()
            }
        };
        for channel in &snapshot.manifest.channels {
            if !view.channels.contains(channel) {
                report.error(format!("channel dropped from config: {channel}"));
            }
        }
        match (&snapshot.manifest.primary_model, &view.primary_model) {
            (_, None) => report.error("no primary model configured"),
            (Some(old), Some(new)) if old != new => {
                report.warn(format!("primary model changed: {old} → {new}"));
            }
            _ => {}
        }

        for link in scan_symlinks(&self.cfg.service_dir) {
            let path = self.cfg.service_dir.join(&link);
            // exists() follows the link: false on an intact symlink file
            // means the target is gone.
            if !path.exists() {
                report.error(format!("dangling symlink: {link}"));
            }
        }

        if let Err(e) = self.supervisor.start().await {
            tracing::debug!(error = %e, "start before verify poll failed");
        }
        if self.poll_until_healthy().await {
            report.note("service answers health checks");
        } else {
            report.error(format!(
                "service did not respond within {}s",
                self.verify_timeout.as_secs()
            ));
        }

        match self.supervisor.recent_logs(120).await {
            Ok(logs) => {
                let pattern = regex::Regex::new(&self.cfg.log_error_pattern);
                if let Ok(pattern) = pattern {
                    let hits = logs.lines().filter(|l| pattern.is_match(l)).count();
                    if hits > 0 {
                        report.warn(format!("{hits} error-pattern matches in recent logs"));
                    }
                }
            }
            Err(e) => report.note(format!("logs unavailable: {e}")),
        }

        report
    }

    async fn poll_until_healthy(&self) -> bool {
        let deadline = tokio::time::Instant::now() + self.verify_timeout;
        loop {
            if http_responsive(&self.http, &self.cfg.service_base_url()).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn finish(
        &self,
        phases: Vec<PhaseReport>,
        applied: bool,
        rolled_back: bool,
        recommendation: &str,
    ) -> UpgradeReport {
        let report = UpgradeReport {
            phases,
            applied,
            rolled_back,
            recommendation: recommendation.to_string(),
        };
        self.events.append(
            &EventRecord::new(
                EventKind::Upgrade,
                format!(
                    "{} errors, {} warnings: {}",
                    report.error_count(),
                    report.warning_count(),
                    report.recommendation
                ),
            )
            .with_outcome(if report.error_count() == 0 { "ok" } else { "failed" }),
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaking_change_keywords_match_case_insensitively() {
        assert!(default_breaking_change("BREAKING: config format changed"));
        assert!(default_breaking_change("db Migration required"));
        assert!(default_breaking_change("incompatible with v1 plugins"));
        assert!(!default_breaking_change("fix typo in readme"));
        assert!(!default_breaking_change("bump patch version"));
    }

    #[test]
    fn suffix_swap_hint_swaps_both_ways() {
        assert_eq!(
            suffix_swap_hint("plugins/weather.plugin.js", ".plugin.js", "-plugin.js"),
            Some("plugins/weather-plugin.js".to_string())
        );
        assert_eq!(
            suffix_swap_hint("plugins/weather-plugin.js", ".plugin.js", "-plugin.js"),
            Some("plugins/weather.plugin.js".to_string())
        );
        assert_eq!(
            suffix_swap_hint("plugins/readme.md", ".plugin.js", "-plugin.js"),
            None
        );
    }

    #[test]
    fn phase_report_passes_with_warnings_only() {
        let mut report = PhaseReport::new("preflight");
        report.warn("dirty tree");
        report.note("version 1.2.3");
        assert!(report.passed());
        report.error("no snapshot");
        assert!(!report.passed());
    }

    #[test]
    fn upgrade_report_counts_across_phases() {
        let mut a = PhaseReport::new("a");
        a.error("x");
        a.warn("y");
        let mut b = PhaseReport::new("b");
        b.warn("z");
        let report = UpgradeReport {
            phases: vec![a, b],
            applied: false,
            rolled_back: false,
            recommendation: String::new(),
        };
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 2);
    }
}
