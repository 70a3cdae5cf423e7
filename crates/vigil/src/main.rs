//! vigil CLI: watchdog and upgrade guard for a managed agent service.
//!
//! Thin wrapper over vigil-core: argument parsing, logging setup, output
//! formatting, and process exit codes live here; all behavior lives in the
//! library.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_core::config::VigilConfig;
use vigil_core::recover::RecoveryOutcome;
use vigil_core::schedule::{SystemTimers, TimerHost};
use vigil_core::snapshot::SnapshotStore;
use vigil_core::upgrade::{PhaseReport, UpgradePipeline};
use vigil_core::watchdog::{CycleOutcome, Watchdog};

#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Keep a managed service alive and guard its upgrades")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one watchdog check cycle.
    Check,
    /// Print watchdog state, timer registration, recent events and trends.
    Status,
    /// Register the periodic check with the host scheduler.
    Install,
    /// Deregister the periodic check.
    Uninstall,
    /// Capture a snapshot of the current system state.
    Snapshot,
    /// Run the upgrade preflight checks only.
    Preflight,
    /// Run the full upgrade pipeline.
    Upgrade {
        /// Stop after preflight; report what would run.
        #[arg(long)]
        dry_run: bool,
    },
    /// Verify current state against the latest snapshot.
    Verify,
    /// Roll back to the latest snapshot.
    Rollback,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("VIGIL_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "vigil=info,vigil_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let cfg = VigilConfig::from_env()?;

    let exit = match cli.command {
        Command::Check => check(cfg).await?,
        Command::Status => status(cfg).await?,
        Command::Install => install(&cfg).await?,
        Command::Uninstall => uninstall().await?,
        Command::Snapshot => snapshot(cfg).await?,
        Command::Preflight => preflight(cfg).await?,
        Command::Upgrade { dry_run } => upgrade(cfg, dry_run).await?,
        Command::Verify => verify(cfg).await?,
        Command::Rollback => rollback(cfg).await?,
    };
    std::process::exit(exit);
}

async fn check(cfg: VigilConfig) -> anyhow::Result<i32> {
    let watchdog = Watchdog::new(cfg)?;
    let outcome = watchdog.run_cycle().await?;
    print_cycle(&outcome);
    Ok(outcome.exit_code())
}

fn print_cycle(outcome: &CycleOutcome) {
    println!("process    {}", pass(outcome.probe.process_up));
    println!("http       {}", pass(outcome.probe.http_up));
    println!("telegram   {}", pass(outcome.probe.aux_channel_ok));
    println!(
        "resources  {} warning(s), {} critical(s)",
        outcome.resources.warnings.len(),
        outcome.resources.criticals.len()
    );
    for line in outcome
        .resources
        .criticals
        .iter()
        .chain(outcome.resources.warnings.iter())
    {
        println!("           - {line}");
    }
    if let Some(pct) = outcome.growth_pct {
        println!("           - service RSS grew {pct:+.1}% over the trend window");
    }
    if outcome.resources.aux_restarted {
        println!("           - aux subprocess group force-restarted");
    }

    match outcome.status {
        vigil_core::state::ServiceStatus::Healthy => println!("status: healthy"),
        status => println!(
            "status: {status} ({} consecutive failure(s))",
            outcome.consecutive_failures
        ),
    }
    if let Some((action, result)) = outcome.action {
        println!("action: {action} → {result}");
    } else if let Some(reason) = outcome.skipped {
        match reason {
            vigil_core::escalate::SkipReason::BelowThreshold => {}
            vigil_core::escalate::SkipReason::Cooldown { remaining_secs } => {
                println!("action: skipped, cooldown for another {remaining_secs}s");
            }
        }
    }
}

async fn status(cfg: VigilConfig) -> anyhow::Result<i32> {
    let registrar = SystemTimers::new(current_exe(), cfg.check_interval_secs);
    let registration = registrar.registration().await?;
    let watchdog = Watchdog::new(cfg)?;
    let report = watchdog.status_report();

    println!("status:               {}", report.state.status);
    println!("consecutive failures: {}", report.state.consecutive_failures);
    println!("last check:           {}", human_ts(report.state.last_check_at));
    println!("last healthy:         {}", human_ts(report.state.last_healthy_at));
    println!(
        "last action:          {} at {}",
        report.state.last_action,
        human_ts(report.state.last_action_at)
    );
    if !report.state.last_issues.is_empty() {
        let issues: Vec<&str> = report.state.last_issues.iter().map(|i| i.as_str()).collect();
        println!("last issues:          {}", issues.join(", "));
    }
    println!(
        "timer:                {}",
        registration.map_or_else(|| "not registered".to_string(), |b| b.to_string())
    );
    println!("metrics:              {}", report.metrics_summary);

    if !report.recent_events.is_empty() {
        println!("\nrecent events:");
        for event in &report.recent_events {
            let outcome = event
                .outcome
                .as_deref()
                .map_or_else(String::new, |o| format!(" [{o}]"));
            println!(
                "  {} {:>12}{} {}",
                human_ts(Some(event.ts)),
                event.kind.to_string(),
                outcome,
                event.message
            );
        }
    }
    Ok(0)
}

async fn install(cfg: &VigilConfig) -> anyhow::Result<i32> {
    let registrar = SystemTimers::new(current_exe(), cfg.check_interval_secs);
    let backend = registrar.install().await?;
    println!("periodic check registered via {backend}");
    Ok(0)
}

async fn uninstall() -> anyhow::Result<i32> {
    let registrar = SystemTimers::new(current_exe(), 60);
    registrar.uninstall().await?;
    println!("periodic check deregistered");
    Ok(0)
}

async fn snapshot(cfg: VigilConfig) -> anyhow::Result<i32> {
    let store = SnapshotStore::new(cfg.snapshots_dir());
    let vcs = vigil_core::git::GitCli::new(&cfg.service_dir, &cfg.git_remote, &cfg.git_branch);
    let http = reqwest_client();
    let up = vigil_core::probe::http_responsive(&http, &cfg.service_base_url()).await;
    let snapshot = store.take(&cfg, &vcs, up).await?;
    println!(
        "snapshot {} (version {}, revision {})",
        snapshot.id(),
        snapshot.manifest.version.as_deref().unwrap_or("unknown"),
        snapshot.manifest.revision.as_deref().unwrap_or("none"),
    );
    Ok(0)
}

async fn preflight(cfg: VigilConfig) -> anyhow::Result<i32> {
    let pipeline = UpgradePipeline::from_config(cfg)?;
    let report = pipeline.preflight().await;
    print_phase(&report);
    println!(
        "preflight: {} error(s), {} warning(s)",
        report.errors.len(),
        report.warnings.len()
    );
    Ok(i32::from(!report.passed()))
}

async fn upgrade(cfg: VigilConfig, dry_run: bool) -> anyhow::Result<i32> {
    let pipeline = UpgradePipeline::from_config(cfg)?;
    let report = pipeline.run(dry_run).await;
    for phase in &report.phases {
        print_phase(phase);
        println!(
            "{}: {} error(s), {} warning(s)",
            phase.phase,
            phase.errors.len(),
            phase.warnings.len()
        );
    }
    println!("\n{}", report.recommendation);
    Ok(i32::from(report.error_count() > 0))
}

async fn verify(cfg: VigilConfig) -> anyhow::Result<i32> {
    let pipeline = UpgradePipeline::from_config(cfg)?;
    let report = pipeline.verify().await;
    print_phase(&report);
    if report.passed() {
        println!("verify: ok ({} warning(s))", report.warnings.len());
        Ok(0)
    } else {
        println!(
            "verify: {} error(s), {} warning(s) — rollback recommended",
            report.errors.len(),
            report.warnings.len()
        );
        Ok(1)
    }
}

async fn rollback(cfg: VigilConfig) -> anyhow::Result<i32> {
    let pipeline = UpgradePipeline::from_config(cfg)?;
    match pipeline.rollback().await {
        RecoveryOutcome::Recovered => {
            println!("rollback complete, service is answering");
            Ok(0)
        }
        RecoveryOutcome::StillDown => {
            println!("rollback ran but the service is not answering");
            Ok(1)
        }
        RecoveryOutcome::NoSnapshot => {
            anyhow::bail!("no snapshot exists to roll back to");
        }
    }
}

fn print_phase(report: &PhaseReport) {
    for error in &report.errors {
        println!("[{}] error: {}", report.phase, error);
    }
    for warning in &report.warnings {
        println!("[{}] warn:  {}", report.phase, warning);
    }
    for note in &report.notes {
        println!("[{}] note:  {}", report.phase, note);
    }
}

fn pass(ok: bool) -> &'static str {
    if ok { "ok" } else { "FAIL" }
}

fn human_ts(ts: Option<u64>) -> String {
    ts.and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0))
        .map_or_else(|| "never".to_string(), |dt| dt.to_rfc3339())
}

fn current_exe() -> String {
    std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "vigil".to_string())
}

fn reqwest_client() -> reqwest::Client {
    reqwest::Client::new()
}
