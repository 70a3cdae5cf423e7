//! One watchdog check cycle.
//!
//! Probe → escalate → act → persist → alert. Each invocation is
//! short-lived and single-shot; the host scheduler provides the cadence
//! and must not overlap runs. State is loaded at the start and persisted
//! at the end of every cycle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::VigilConfig;
use crate::error::Result;
use crate::escalate::{ActionPlan, EscalationPolicy, SkipReason};
use crate::events::{EventKind, EventLog, EventRecord};
use crate::git::GitCli;
use crate::metrics::MetricsLog;
use crate::notify::{AlertGate, AlertMessage, AlertSeverity, Notifier, WebhookNotifier, deliver_gated};
use crate::pkg::{NodePackageManager, PackageManager, UnavailablePackageManager};
use crate::probe::{HealthProbe, ProbeReport, ResourceReport};
use crate::recover::{RecoveryActuator, RecoveryOutcome};
use crate::service::{ServiceSupervisor, resolve_supervisor};
use crate::service_config::ServiceConfigView;
use crate::snapshot::SnapshotStore;
use crate::state::{
    IssueCode, RemedialAction, ServiceStatus, StateStore, WatchdogState, epoch_secs,
};

/// Result of one check cycle, for printing and exit-code mapping.
#[derive(Debug)]
pub struct CycleOutcome {
    pub probe: ProbeReport,
    pub resources: ResourceReport,
    pub status: ServiceStatus,
    pub consecutive_failures: u32,
    /// The action taken this cycle, if any, with its result.
    pub action: Option<(RemedialAction, RecoveryOutcome)>,
    /// Why no action was taken despite an unhealthy check.
    pub skipped: Option<SkipReason>,
    /// Flagged RSS growth percentage, if the heuristic fired.
    pub growth_pct: Option<f64>,
}

impl CycleOutcome {
    /// 0 when the service ended the cycle healthy (or recovered), 1
    /// otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ServiceStatus::Healthy | ServiceStatus::Recovered | ServiceStatus::RolledBack => 0,
            ServiceStatus::Unhealthy => 1,
        }
    }
}

/// Assembled `status` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: WatchdogState,
    pub recent_events: Vec<crate::events::EventRecord>,
    pub metrics_summary: String,
}

/// The watchdog: owns the wired dependencies for one invocation.
pub struct Watchdog {
    cfg: VigilConfig,
    store: StateStore,
    events: EventLog,
    metrics: MetricsLog,
    probe: HealthProbe,
    supervisor: Arc<dyn ServiceSupervisor>,
    actuator: RecoveryActuator,
    notifier: Option<Box<dyn Notifier>>,
    policy: EscalationPolicy,
    gate: AlertGate,
}

impl Watchdog {
    /// Wire the real dependency graph from configuration.
    pub fn new(cfg: VigilConfig) -> Result<Self> {
        let supervisor: Arc<dyn ServiceSupervisor> = resolve_supervisor(
            &cfg.service_unit,
            &cfg.process_pattern,
            cfg.start_command.clone(),
            &cfg.service_dir,
        )
        .into();
        let vcs = Arc::new(GitCli::new(
            &cfg.service_dir,
            &cfg.git_remote,
            &cfg.git_branch,
        ));
        let pkg: Arc<dyn PackageManager> =
            match NodePackageManager::detect(&cfg.service_dir, cfg.build_command.clone()) {
                Ok(pkg) => Arc::new(pkg),
                Err(e) => Arc::new(UnavailablePackageManager::new(e.to_string())),
            };
        let events = EventLog::new(cfg.events_file());
        let actuator = RecoveryActuator::new(
            &cfg,
            Arc::clone(&supervisor),
            vcs,
            pkg,
            SnapshotStore::new(cfg.snapshots_dir()),
            events.clone(),
        );
        Self::with_parts(cfg, supervisor, actuator, events)
    }

    /// Wire with explicit supervisor/actuator (tests inject fakes here).
    pub fn with_parts(
        cfg: VigilConfig,
        supervisor: Arc<dyn ServiceSupervisor>,
        actuator: RecoveryActuator,
        events: EventLog,
    ) -> Result<Self> {
        let probe = HealthProbe::new(&cfg)?;
        let store = StateStore::new(cfg.state_file());
        let metrics = MetricsLog::new(cfg.metrics_file(), cfg.metrics_max_lines);
        let notifier: Option<Box<dyn Notifier>> = if cfg.alerts_enabled {
            cfg.alert_webhook_url
                .as_deref()
                .map(|url| Box::new(WebhookNotifier::new(url)) as Box<dyn Notifier>)
        } else {
            None
        };
        let policy = EscalationPolicy::new(cfg.fail_threshold, cfg.action_cooldown_secs);
        let gate = AlertGate::new(cfg.alert_cooldown_secs, cfg.warn_alert_cooldown_secs);
        Ok(Self {
            cfg,
            store,
            events,
            metrics,
            probe,
            supervisor,
            actuator,
            notifier,
            policy,
            gate,
        })
    }

    /// Run one check cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let now = epoch_secs();
        let mut state = self.store.load();

        let view = ServiceConfigView::load(&self.cfg.config_path).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "service config unreadable during probe");
            ServiceConfigView::default()
        });
        let probe = self
            .probe
            .probe(view.telegram_configured(), self.supervisor.as_ref())
            .await;
        let resources = self.probe.sample_resources();

        if let Err(e) = self.metrics.record(&resources.sample) {
            tracing::warn!(error = %e, "failed to record metric sample");
        }
        let growth_pct = self.metrics.growth_flagged(resources.sample.service_rss_mb);

        let mut issues = probe.issues.clone();
        if !resources.criticals.is_empty() {
            issues.push(IssueCode::ResourceCrit);
        } else if !resources.warnings.is_empty() {
            issues.push(IssueCode::ResourceWarn);
        }

        state.last_check_at = Some(now);
        state.last_issues = issues;

        if resources.aux_restarted {
            state.last_resource_cleanup_at = Some(now);
            self.events.append(
                &EventRecord::new(
                    EventKind::AuxCleanup,
                    format!(
                        "aux pool at {} MB, subprocess group restarted",
                        resources.sample.aux_mb
                    ),
                )
                .with_outcome("ok"),
            );
        }

        let mut action = None;
        let mut skipped = None;

        if probe.healthy() {
            state.status = ServiceStatus::Healthy;
            state.reset_failures(now);
        } else {
            state.consecutive_failures += 1;
            state.status = ServiceStatus::Unhealthy;

            match self.policy.next_action(&state, now) {
                ActionPlan::Skip(reason) => {
                    skipped = Some(reason);
                    tracing::info!(
                        consecutive = state.consecutive_failures,
                        reason = ?reason,
                        "unhealthy, not yet acting"
                    );
                    self.events.append(
                        &EventRecord::new(
                            EventKind::Check,
                            format!(
                                "unhealthy ({} consecutive), no action",
                                state.consecutive_failures
                            ),
                        )
                        .with_outcome("unhealthy"),
                    );
                }
                ActionPlan::Act(chosen) => {
                    let outcome = match chosen {
                        RemedialAction::Restart => self.actuator.restart().await,
                        RemedialAction::Rollback => self.actuator.rollback().await,
                        RemedialAction::None => RecoveryOutcome::StillDown,
                    };
                    match outcome {
                        RecoveryOutcome::Recovered => {
                            state.record_action(chosen, now);
                            state.reset_failures(now);
                            state.status = match chosen {
                                RemedialAction::Rollback => ServiceStatus::RolledBack,
                                _ => ServiceStatus::Recovered,
                            };
                        }
                        RecoveryOutcome::StillDown => {
                            // Leave the counter elevated so the next cycle
                            // can escalate further.
                            state.record_action(chosen, now);
                        }
                        RecoveryOutcome::NoSnapshot => {
                            // No action actually ran: last_action and the
                            // counter stay untouched.
                        }
                    }
                    action = Some((chosen, outcome));
                }
            }
        }

        self.send_alerts(&mut state, &probe, &resources, growth_pct, action, now)
            .await;
        self.store.save(&state)?;

        Ok(CycleOutcome {
            probe,
            resources,
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            action,
            skipped,
            growth_pct,
        })
    }

    /// Resource findings and action results go out as gated alerts; the
    /// state carries the cooldown timestamps.
    async fn send_alerts(
        &self,
        state: &mut WatchdogState,
        probe: &ProbeReport,
        resources: &ResourceReport,
        growth_pct: Option<f64>,
        action: Option<(RemedialAction, RecoveryOutcome)>,
        now: u64,
    ) {
        let mut critical_lines = Vec::new();
        if let Some((taken, outcome)) = action {
            critical_lines.push(format!("action {taken}: {outcome}"));
        }
        if !probe.healthy() && state.consecutive_failures >= self.policy.fail_threshold {
            critical_lines.push(format!(
                "service unhealthy ({} consecutive failures)",
                state.consecutive_failures
            ));
        }
        critical_lines.extend(resources.criticals.iter().cloned());

        if !critical_lines.is_empty() {
            let msg = AlertMessage::new(
                AlertSeverity::Critical,
                format!("{} unhealthy", self.cfg.service_unit),
                critical_lines.join("; "),
            );
            if deliver_gated(self.notifier.as_deref(), self.gate, &msg, state, now).await {
                self.events.append(
                    &EventRecord::new(EventKind::Alert, msg.title.clone()).with_outcome("critical"),
                );
            }
        }

        let mut warn_lines = resources.warnings.clone();
        if let Some(pct) = growth_pct {
            warn_lines.push(format!("service RSS grew {pct:.1}% over the trend window"));
        }
        if !warn_lines.is_empty() {
            let msg = AlertMessage::new(
                AlertSeverity::Warning,
                format!("{} resource warning", self.cfg.service_unit),
                warn_lines.join("; "),
            );
            if deliver_gated(self.notifier.as_deref(), self.gate, &msg, state, now).await {
                self.events.append(
                    &EventRecord::new(EventKind::Alert, msg.title.clone()).with_outcome("warning"),
                );
            }
        }
    }

    /// Assemble the `status` view.
    #[must_use]
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.store.load(),
            recent_events: self.events.tail(10),
            metrics_summary: self.metrics.trend_summary(),
        }
    }
}
