//! Upgrade pipeline phases over fakes: preflight, apply failure rollback,
//! verification diffs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakePkg, FakeSupervisor, FakeVcs, seed_service_dir, test_config, unbound_port};
use tempfile::TempDir;
use vigil_core::config::VigilConfig;
use vigil_core::events::EventLog;
use vigil_core::recover::RecoveryActuator;
use vigil_core::snapshot::SnapshotStore;
use vigil_core::upgrade::UpgradePipeline;

struct Harness {
    cfg: VigilConfig,
    vcs: Arc<FakeVcs>,
    pkg: Arc<FakePkg>,
    supervisor: Arc<FakeSupervisor>,
    snapshots: SnapshotStore,
    _service: TempDir,
    _state: TempDir,
}

impl Harness {
    fn new(port: u16, mutate: impl FnOnce(&mut FakeVcs, &mut FakePkg, &mut FakeSupervisor)) -> Self {
        let service = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        seed_service_dir(service.path());
        let cfg = test_config(service.path(), state.path(), port, &[]);

        let mut vcs = FakeVcs::new("rev-old", "rev-new");
        let mut pkg = FakePkg::new();
        let mut supervisor = FakeSupervisor::new(port);
        mutate(&mut vcs, &mut pkg, &mut supervisor);

        Self {
            cfg: cfg.clone(),
            vcs: Arc::new(vcs),
            pkg: Arc::new(pkg),
            supervisor: Arc::new(supervisor),
            snapshots: SnapshotStore::new(cfg.snapshots_dir()),
            _service: service,
            _state: state,
        }
    }

    fn pipeline(&self) -> UpgradePipeline {
        let events = EventLog::new(self.cfg.events_file());
        let supervisor =
            Arc::clone(&self.supervisor) as Arc<dyn vigil_core::service::ServiceSupervisor>;
        let vcs = Arc::clone(&self.vcs) as Arc<dyn vigil_core::git::VersionControl>;
        let pkg = Arc::clone(&self.pkg) as Arc<dyn vigil_core::pkg::PackageManager>;
        let actuator = RecoveryActuator::new(
            &self.cfg,
            Arc::clone(&supervisor),
            Arc::clone(&vcs),
            Arc::clone(&pkg),
            self.snapshots.clone(),
            events.clone(),
        )
        .with_timing(
            Duration::from_millis(500),
            Duration::from_millis(10),
            Duration::from_millis(100),
        );
        UpgradePipeline::new(
            self.cfg.clone(),
            supervisor,
            vcs,
            pkg,
            self.snapshots.clone(),
            events,
            actuator,
        )
        .with_verify_timing(Duration::from_millis(500), Duration::from_millis(100))
    }

    async fn take_snapshot(&self) {
        self.snapshots
            .take(&self.cfg, self.vcs.as_ref(), false)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn preflight_blocks_without_snapshot() {
    let h = Harness::new(unbound_port(), |_, _, _| {});
    let report = h.pipeline().preflight().await;
    assert!(!report.passed());
    assert!(report.errors.iter().any(|e| e.contains("no snapshot")));
}

#[tokio::test]
async fn dirty_tree_warns_but_proceeds() {
    let h = Harness::new(unbound_port(), |vcs, _, _| {
        vcs.clean = false;
    });
    h.take_snapshot().await;

    let report = h.pipeline().preflight().await;
    assert!(report.passed(), "errors: {:?}", report.errors);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("working tree is dirty"))
    );
}

#[tokio::test]
async fn breaking_change_keywords_raise_warnings() {
    let h = Harness::new(unbound_port(), |vcs, _, _| {
        vcs.incoming = vec![
            "fix: typo".to_string(),
            "BREAKING: rename plugin interface".to_string(),
        ];
    });
    h.take_snapshot().await;

    let report = h.pipeline().preflight().await;
    assert!(report.passed());
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("possible breaking change"))
    );
}

#[tokio::test]
async fn dry_run_applies_nothing() {
    let h = Harness::new(unbound_port(), |_, _, _| {});
    h.take_snapshot().await;

    let report = h.pipeline().run(true).await;
    assert!(!report.applied);
    assert!(!report.rolled_back);
    assert_eq!(h.vcs.revision(), "rev-old");
    assert!(h.pkg.calls.all().is_empty());
    assert!(report.recommendation.contains("dry run"));
}

#[tokio::test]
async fn build_failure_triggers_automatic_rollback() {
    let h = Harness::new(unbound_port(), |_, pkg, supervisor| {
        pkg.fail_build = true;
        supervisor.serve_on_start = true;
    });
    h.take_snapshot().await;

    let report = h.pipeline().run(false).await;
    assert!(report.error_count() >= 1);
    assert!(report.rolled_back);
    // The rollback restored the pre-upgrade snapshot's revision.
    assert_eq!(h.vcs.revision(), "rev-old");
    let calls = h.vcs.calls.all();
    assert!(calls.contains(&"update".to_string()));
    assert!(calls.contains(&"checkout rev-old".to_string()));
    assert!(report.recommendation.contains("rollback was performed"));
}

#[tokio::test]
async fn install_failure_reverts_the_checkout() {
    let h = Harness::new(unbound_port(), |_, pkg, _| {
        pkg.fail_install = true;
    });
    h.take_snapshot().await;

    let report = h.pipeline().run(false).await;
    assert!(report.error_count() >= 1);
    assert!(!report.rolled_back);
    assert_eq!(h.vcs.revision(), "rev-old");
}

#[tokio::test]
async fn successful_upgrade_verifies_clean() {
    let port = unbound_port();
    let h = Harness::new(port, |_, _, supervisor| {
        supervisor.serve_on_start = true;
    });
    h.take_snapshot().await;

    let report = h.pipeline().run(false).await;
    assert_eq!(report.error_count(), 0, "phases: {:?}", report.phases);
    assert!(report.applied);
    assert!(!report.rolled_back);
    assert_eq!(h.vcs.revision(), "rev-new");
    assert!(report.recommendation.contains("verified"));
    // A fresh snapshot was captured before apply.
    assert_eq!(h.snapshots.list().len(), 2);
}

#[tokio::test]
async fn verify_flags_removed_artifacts_channels_and_model() {
    let h = Harness::new(unbound_port(), |_, _, _| {});
    h.take_snapshot().await;

    // Simulate a bad upgrade: one artifact renamed to the other
    // convention, one gone, a channel dropped, the model swapped.
    let dir = h.cfg.service_dir.clone();
    std::fs::rename(
        dir.join("plugins/weather.plugin.js"),
        dir.join("plugins/weather-plugin.js"),
    )
    .unwrap();
    std::fs::remove_file(dir.join("plugins/search.plugin.js")).unwrap();
    std::fs::write(
        dir.join("config.json"),
        r#"{"channels": ["discord"], "model": "haiku-mini"}"#,
    )
    .unwrap();

    let report = h.pipeline().verify().await;
    assert!(!report.passed());
    assert!(report.errors.iter().any(|e| {
        e.contains("plugins/weather.plugin.js")
            && e.contains("possibly renamed to plugins/weather-plugin.js")
    }));
    assert!(
        report
            .errors
            .iter()
            .any(|e| e.contains("artifact removed: plugins/search.plugin.js"))
    );
    assert!(
        report
            .errors
            .iter()
            .any(|e| e.contains("channel dropped from config: telegram"))
    );
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("primary model changed"))
    );
    // No listener on the port: the health poll fails too.
    assert!(
        report
            .errors
            .iter()
            .any(|e| e.contains("did not respond"))
    );
}

#[tokio::test]
async fn dangling_symlink_is_fatal_in_verify() {
    #[cfg(unix)]
    {
        let h = Harness::new(unbound_port(), |_, _, _| {});
        h.take_snapshot().await;

        let dir = h.cfg.service_dir.clone();
        std::fs::write(dir.join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink(dir.join("target.txt"), dir.join("link.txt")).unwrap();
        std::fs::remove_file(dir.join("target.txt")).unwrap();

        let report = h.pipeline().verify().await;
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("dangling symlink: link.txt"))
        );
    }
}
