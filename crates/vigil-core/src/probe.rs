//! Liveness probes and resource sampling.
//!
//! `probe()` never mutates anything beyond its network reads. Resource
//! sampling carries the single deliberate exception: a critical breach on
//! the auxiliary browser pool kills that process group so the service
//! respawns it — an isolated, cheap action with a blast radius far smaller
//! than the escalator's restart/rollback path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use crate::config::{AUX_ERROR_THRESHOLD, AUX_LOG_WINDOW_SECS, HTTP_PROBE_TIMEOUT_SECS, VigilConfig};
use crate::metrics::MetricSample;
use crate::service::ServiceSupervisor;
use crate::state::{IssueCode, epoch_secs};

/// Result of one liveness probe pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub process_up: bool,
    pub http_up: bool,
    pub aux_channel_ok: bool,
    pub issues: Vec<IssueCode>,
}

impl ProbeReport {
    /// The service counts as healthy when both hard signals pass.
    /// Auxiliary-channel trouble never fails a check on its own.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.process_up && self.http_up
    }
}

/// Classified outcome of one resource sampling pass.
#[derive(Debug, Clone)]
pub struct ResourceReport {
    pub sample: MetricSample,
    pub warnings: Vec<String>,
    pub criticals: Vec<String>,
    /// Whether the aux pool was force-restarted this pass.
    pub aux_restarted: bool,
}

/// Liveness and resource prober for the managed service.
pub struct HealthProbe {
    port: u16,
    base_url: String,
    process_pattern: String,
    aux_process_pattern: String,
    service_dir: PathBuf,
    log_error_pattern: Regex,
    mem_warn_pct: f64,
    mem_crit_pct: f64,
    disk_warn_pct: f64,
    disk_crit_pct: f64,
    service_rss_warn_mb: u64,
    service_rss_crit_mb: u64,
    aux_mem_warn_mb: u64,
    aux_mem_crit_mb: u64,
    http: reqwest::Client,
}

impl HealthProbe {
    pub fn new(cfg: &VigilConfig) -> crate::Result<Self> {
        let log_error_pattern = Regex::new(&cfg.log_error_pattern)
            .map_err(|e| crate::Error::Config(format!("bad VIGIL_LOG_ERROR_PATTERN: {e}")))?;
        Ok(Self {
            port: cfg.service_port,
            base_url: cfg.service_base_url(),
            process_pattern: cfg.process_pattern.clone(),
            aux_process_pattern: cfg.aux_process_pattern.clone(),
            service_dir: cfg.service_dir.clone(),
            log_error_pattern,
            mem_warn_pct: cfg.mem_warn_pct,
            mem_crit_pct: cfg.mem_crit_pct,
            disk_warn_pct: cfg.disk_warn_pct,
            disk_crit_pct: cfg.disk_crit_pct,
            service_rss_warn_mb: cfg.service_rss_warn_mb,
            service_rss_crit_mb: cfg.service_rss_crit_mb,
            aux_mem_warn_mb: cfg.aux_mem_warn_mb,
            aux_mem_crit_mb: cfg.aux_mem_crit_mb,
            http: reqwest::Client::new(),
        })
    }

    /// Run the liveness checks.
    pub async fn probe(
        &self,
        telegram_configured: bool,
        supervisor: &dyn ServiceSupervisor,
    ) -> ProbeReport {
        let process_up = self.check_process();
        let http_up = self.check_http().await;
        let aux_channel_ok = if telegram_configured {
            self.check_aux_channel(supervisor).await
        } else {
            true
        };

        let mut issues = Vec::new();
        if !process_up {
            issues.push(IssueCode::ProcessDown);
        }
        if !http_up {
            issues.push(IssueCode::HttpDown);
        }
        if !aux_channel_ok {
            issues.push(IssueCode::TelegramErrors);
        }

        ProbeReport {
            process_up,
            http_up,
            aux_channel_ok,
            issues,
        }
    }

    /// Process located by name/cmdline pattern, or its port being bound.
    fn check_process(&self) -> bool {
        if process_matches(&self.process_pattern) > 0 {
            return true;
        }
        self.port_bound()
    }

    fn port_bound(&self) -> bool {
        std::net::TcpStream::connect_timeout(
            &std::net::SocketAddr::from(([127, 0, 0, 1], self.port)),
            Duration::from_secs(2),
        )
        .is_ok()
    }

    async fn check_http(&self) -> bool {
        http_responsive(&self.http, &self.base_url).await
    }

    /// Inspect the last two minutes of service logs for channel errors.
    async fn check_aux_channel(&self, supervisor: &dyn ServiceSupervisor) -> bool {
        let logs = match supervisor.recent_logs(AUX_LOG_WINDOW_SECS).await {
            Ok(logs) => logs,
            Err(e) => {
                tracing::debug!(error = %e, "could not read service logs, treating channel as ok");
                return true;
            }
        };
        self.count_log_errors(&logs) <= AUX_ERROR_THRESHOLD
    }

    fn count_log_errors(&self, logs: &str) -> usize {
        logs.lines()
            .filter(|line| self.log_error_pattern.is_match(line))
            .count()
    }

    /// Sample system/process resources and classify against thresholds.
    ///
    /// The only probe path with a side effect: an aux-pool critical kills
    /// that subprocess group (the service respawns it).
    pub fn sample_resources(&self) -> ResourceReport {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_processes();

        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = total.saturating_sub(available);
        let mem_used_pct = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let mem_avail_mb = available / (1024 * 1024);

        let disk_used_pct = disk_used_pct_for(&self.service_dir);
        let service_rss_mb = aggregate_rss_mb(&sys, &self.process_pattern);
        let aux_mb = aggregate_rss_mb(&sys, &self.aux_process_pattern);

        let sample = MetricSample {
            ts: epoch_secs(),
            mem_used_pct,
            mem_avail_mb,
            disk_used_pct,
            service_rss_mb,
            aux_mb,
        };

        let mut warnings = Vec::new();
        let mut criticals = Vec::new();
        classify_pct(
            "system memory",
            mem_used_pct,
            self.mem_warn_pct,
            self.mem_crit_pct,
            &mut warnings,
            &mut criticals,
        );
        classify_pct(
            "disk",
            disk_used_pct,
            self.disk_warn_pct,
            self.disk_crit_pct,
            &mut warnings,
            &mut criticals,
        );
        classify_mb(
            "service rss",
            service_rss_mb,
            self.service_rss_warn_mb,
            self.service_rss_crit_mb,
            &mut warnings,
            &mut criticals,
        );
        let aux_critical = classify_mb(
            "aux pool memory",
            aux_mb,
            self.aux_mem_warn_mb,
            self.aux_mem_crit_mb,
            &mut warnings,
            &mut criticals,
        );

        let aux_restarted = if aux_critical {
            let killed = kill_matching(&mut sys, &self.aux_process_pattern);
            tracing::warn!(
                killed,
                aux_mb,
                "aux pool memory critical, force-restarted subprocess group"
            );
            killed > 0
        } else {
            false
        };

        ResourceReport {
            sample,
            warnings,
            criticals,
            aux_restarted,
        }
    }
}

/// Primary health endpoint, then root; any success counts.
///
/// A response from the root endpoint proves the HTTP listener is alive
/// even if the route 404s.
pub async fn http_responsive(client: &reqwest::Client, base_url: &str) -> bool {
    let timeout = Duration::from_secs(HTTP_PROBE_TIMEOUT_SECS);
    let health = format!("{base_url}/health");
    match client.get(&health).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => return true,
        Ok(_) | Err(_) => {}
    }
    client.get(base_url).timeout(timeout).send().await.is_ok()
}

fn classify_pct(
    label: &str,
    value: f64,
    warn: f64,
    crit: f64,
    warnings: &mut Vec<String>,
    criticals: &mut Vec<String>,
) -> bool {
    if value >= crit {
        criticals.push(format!("{label} at {value:.1}% (critical ≥ {crit:.0}%)"));
        true
    } else if value >= warn {
        warnings.push(format!("{label} at {value:.1}% (warn ≥ {warn:.0}%)"));
        false
    } else {
        false
    }
}

fn classify_mb(
    label: &str,
    value_mb: u64,
    warn_mb: u64,
    crit_mb: u64,
    warnings: &mut Vec<String>,
    criticals: &mut Vec<String>,
) -> bool {
    if value_mb >= crit_mb {
        criticals.push(format!("{label} at {value_mb} MB (critical ≥ {crit_mb} MB)"));
        true
    } else if value_mb >= warn_mb {
        warnings.push(format!("{label} at {value_mb} MB (warn ≥ {warn_mb} MB)"));
        false
    } else {
        false
    }
}

fn matches_pattern(name: &str, cmd: &[String], pattern: &str) -> bool {
    name.contains(pattern) || cmd.iter().any(|arg| arg.contains(pattern))
}

fn process_matches(pattern: &str) -> usize {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .values()
        .filter(|p| matches_pattern(p.name(), p.cmd(), pattern))
        .count()
}

fn aggregate_rss_mb(sys: &System, pattern: &str) -> u64 {
    let bytes: u64 = sys
        .processes()
        .values()
        .filter(|p| matches_pattern(p.name(), p.cmd(), pattern))
        .map(sysinfo::Process::memory)
        .sum();
    bytes / (1024 * 1024)
}

fn kill_matching(sys: &mut System, pattern: &str) -> usize {
    sys.refresh_processes();
    sys.processes()
        .values()
        .filter(|p| matches_pattern(p.name(), p.cmd(), pattern))
        .filter(|p| p.kill())
        .count()
}

/// Usage percentage of the filesystem holding `path` (longest mount-point
/// prefix wins).
fn disk_used_pct_for(path: &Path) -> f64 {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, f64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let depth = mount.components().count();
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let used = total.saturating_sub(disk.available_space());
            let pct = used as f64 / total as f64 * 100.0;
            if best.is_none_or(|(d, _)| depth > d) {
                best = Some((depth, pct));
            }
        }
    }
    best.map_or(0.0, |(_, pct)| pct)
}

/// Free space in MB on the filesystem holding `path`.
#[must_use]
pub fn free_disk_mb(path: &Path) -> u64 {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let depth = mount.components().count();
            let free = disk.available_space() / (1024 * 1024);
            if best.is_none_or(|(d, _)| depth > d) {
                best = Some((depth, free));
            }
        }
    }
    best.map_or(0, |(_, free)| free)
}
