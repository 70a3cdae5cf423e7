//! Watchdog configuration.
//!
//! Every knob is read from a `VIGIL_*` environment variable and falls back
//! to a default, so a bare `vigil check` works on a conventionally laid-out
//! host. The lookup function is injectable for tests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default HTTP health endpoint timeout in seconds.
pub const HTTP_PROBE_TIMEOUT_SECS: u64 = 10;

/// Log window inspected for auxiliary-channel errors, in seconds.
pub const AUX_LOG_WINDOW_SECS: u64 = 120;

/// Auxiliary-channel error matches tolerated within the log window.
pub const AUX_ERROR_THRESHOLD: usize = 3;

/// Free-disk floor checked during upgrade preflight, in megabytes.
pub const MIN_FREE_DISK_MB: u64 = 500;

/// Resolved watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Directory the managed service is installed in (its git checkout).
    pub service_dir: PathBuf,
    /// The service's own configuration file (opaque JSON).
    pub config_path: PathBuf,
    /// Directory holding vigil's state record, logs and snapshots.
    pub state_dir: PathBuf,
    /// systemd unit name of the managed service.
    pub service_unit: String,
    /// Process name/cmdline pattern locating the service process.
    pub process_pattern: String,
    /// Pattern locating the auxiliary browser subprocess pool.
    pub aux_process_pattern: String,
    /// HTTP port the service listens on.
    pub service_port: u16,
    /// Shell command that starts the service when no supervisor is available.
    pub start_command: Option<String>,
    /// Declared build step (run after dependency install), if any.
    pub build_command: Option<String>,
    /// Git remote tracked for upgrades.
    pub git_remote: String,
    /// Git branch tracked for upgrades.
    pub git_branch: String,
    /// File the service version is read from, relative to `service_dir`.
    pub version_file: String,

    /// Consecutive failures before a remedial action is considered.
    pub fail_threshold: u32,
    /// Seconds to poll HTTP health after a restart.
    pub restart_timeout_secs: u64,
    /// Settle delay before the single post-rollback health check.
    pub rollback_settle_secs: u64,
    /// Minimum seconds between two remedial actions.
    pub action_cooldown_secs: u64,
    /// Scheduler interval used by `install`.
    pub check_interval_secs: u64,

    /// System memory thresholds (percent used).
    pub mem_warn_pct: f64,
    pub mem_crit_pct: f64,
    /// Disk usage thresholds for the service's filesystem (percent used).
    pub disk_warn_pct: f64,
    pub disk_crit_pct: f64,
    /// Service process resident memory thresholds (MB).
    pub service_rss_warn_mb: u64,
    pub service_rss_crit_mb: u64,
    /// Auxiliary pool aggregate memory thresholds (MB).
    pub aux_mem_warn_mb: u64,
    pub aux_mem_crit_mb: u64,

    /// Bounded metric log length.
    pub metrics_max_lines: usize,

    /// Whether outbound alerts are enabled at all.
    pub alerts_enabled: bool,
    /// Webhook URL alerts are POSTed to (alerts are skipped when unset).
    pub alert_webhook_url: Option<String>,
    /// Minimum seconds between critical alerts.
    pub alert_cooldown_secs: u64,
    /// Minimum seconds between warning alerts.
    pub warn_alert_cooldown_secs: u64,

    /// Regex matched against recent service logs to count channel errors.
    pub log_error_pattern: String,
    /// Artifact naming convention matched by the snapshot inventory.
    pub artifact_suffix: String,
    /// Alternate artifact convention (used by the rename hint).
    pub artifact_suffix_alt: String,
}

impl VigilConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an injectable lookup (tests).
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_dir = get("VIGIL_SERVICE_DIR")
            .map_or_else(|| PathBuf::from("/opt/agent-bot"), PathBuf::from);
        let config_path = get("VIGIL_CONFIG_PATH")
            .map_or_else(|| service_dir.join("config.json"), PathBuf::from);
        let state_dir = get("VIGIL_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::data_local_dir().map(|d| d.join("vigil")))
            .unwrap_or_else(|| PathBuf::from("/var/lib/vigil"));

        Ok(Self {
            service_dir,
            config_path,
            state_dir,
            service_unit: get("VIGIL_SERVICE_UNIT").unwrap_or_else(|| "agent-bot".to_string()),
            process_pattern: get("VIGIL_PROCESS_PATTERN")
                .unwrap_or_else(|| "agent-bot".to_string()),
            aux_process_pattern: get("VIGIL_AUX_PROCESS_PATTERN")
                .unwrap_or_else(|| "chromium".to_string()),
            service_port: parse(&get, "VIGIL_SERVICE_PORT", 3000u16)?,
            start_command: get("VIGIL_START_COMMAND"),
            build_command: get("VIGIL_BUILD_COMMAND"),
            git_remote: get("VIGIL_GIT_REMOTE").unwrap_or_else(|| "origin".to_string()),
            git_branch: get("VIGIL_GIT_BRANCH").unwrap_or_else(|| "main".to_string()),
            version_file: get("VIGIL_VERSION_FILE").unwrap_or_else(|| "package.json".to_string()),
            fail_threshold: parse(&get, "VIGIL_FAIL_THRESHOLD", 3u32)?,
            restart_timeout_secs: parse(&get, "VIGIL_RESTART_TIMEOUT_SECS", 60u64)?,
            rollback_settle_secs: parse(&get, "VIGIL_ROLLBACK_SETTLE_SECS", 10u64)?,
            action_cooldown_secs: parse(&get, "VIGIL_ACTION_COOLDOWN_SECS", 300u64)?,
            check_interval_secs: parse(&get, "VIGIL_CHECK_INTERVAL_SECS", 60u64)?,
            mem_warn_pct: parse(&get, "VIGIL_MEM_WARN_PCT", 80.0f64)?,
            mem_crit_pct: parse(&get, "VIGIL_MEM_CRIT_PCT", 90.0f64)?,
            disk_warn_pct: parse(&get, "VIGIL_DISK_WARN_PCT", 80.0f64)?,
            disk_crit_pct: parse(&get, "VIGIL_DISK_CRIT_PCT", 90.0f64)?,
            service_rss_warn_mb: parse(&get, "VIGIL_SERVICE_RSS_WARN_MB", 1024u64)?,
            service_rss_crit_mb: parse(&get, "VIGIL_SERVICE_RSS_CRIT_MB", 2048u64)?,
            aux_mem_warn_mb: parse(&get, "VIGIL_AUX_MEM_WARN_MB", 1536u64)?,
            aux_mem_crit_mb: parse(&get, "VIGIL_AUX_MEM_CRIT_MB", 3072u64)?,
            metrics_max_lines: parse(&get, "VIGIL_METRICS_MAX_LINES", 1440usize)?,
            alerts_enabled: parse_bool(&get, "VIGIL_ALERTS_ENABLED", true)?,
            alert_webhook_url: get("VIGIL_ALERT_WEBHOOK_URL"),
            alert_cooldown_secs: parse(&get, "VIGIL_ALERT_COOLDOWN_SECS", 300u64)?,
            warn_alert_cooldown_secs: parse(&get, "VIGIL_WARN_ALERT_COOLDOWN_SECS", 1800u64)?,
            log_error_pattern: get("VIGIL_LOG_ERROR_PATTERN").unwrap_or_else(|| {
                r"(?i)(telegram.*(error|fail)|ETELEGRAM|polling_error|409 Conflict|401 Unauthorized)"
                    .to_string()
            }),
            artifact_suffix: get("VIGIL_ARTIFACT_SUFFIX")
                .unwrap_or_else(|| ".plugin.js".to_string()),
            artifact_suffix_alt: get("VIGIL_ARTIFACT_SUFFIX_ALT")
                .unwrap_or_else(|| "-plugin.js".to_string()),
        })
    }

    /// Path of the mutable state record.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    /// Path of the bounded metrics log.
    #[must_use]
    pub fn metrics_file(&self) -> PathBuf {
        self.state_dir.join("metrics.jsonl")
    }

    /// Path of the append-only event log.
    #[must_use]
    pub fn events_file(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }

    /// Root of the snapshot directory tree.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir.join("snapshots")
    }

    /// Base URL of the service's HTTP interface.
    #[must_use]
    pub fn service_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.service_port)
    }
}

fn parse<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {key}: {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_bool<F>(get: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid value for {key}: {raw:?}"))),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| (*v).to_string())
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let map = HashMap::new();
        let cfg = VigilConfig::from_lookup(lookup(&map)).unwrap();
        assert_eq!(cfg.fail_threshold, 3);
        assert_eq!(cfg.action_cooldown_secs, 300);
        assert_eq!(cfg.restart_timeout_secs, 60);
        assert_eq!(cfg.metrics_max_lines, 1440);
        assert_eq!(cfg.service_port, 3000);
        assert!(cfg.alerts_enabled);
        assert!(cfg.alert_webhook_url.is_none());
        assert_eq!(cfg.config_path, cfg.service_dir.join("config.json"));
    }

    #[test]
    fn overrides_take_effect() {
        let map = HashMap::from([
            ("VIGIL_FAIL_THRESHOLD", "5"),
            ("VIGIL_SERVICE_PORT", "8088"),
            ("VIGIL_ALERTS_ENABLED", "off"),
            ("VIGIL_SERVICE_DIR", "/srv/bot"),
        ]);
        let cfg = VigilConfig::from_lookup(lookup(&map)).unwrap();
        assert_eq!(cfg.fail_threshold, 5);
        assert_eq!(cfg.service_port, 8088);
        assert!(!cfg.alerts_enabled);
        assert_eq!(cfg.service_dir, PathBuf::from("/srv/bot"));
        assert_eq!(cfg.config_path, PathBuf::from("/srv/bot/config.json"));
    }

    #[test]
    fn invalid_number_is_a_config_error() {
        let map = HashMap::from([("VIGIL_FAIL_THRESHOLD", "lots")]);
        let err = VigilConfig::from_lookup(lookup(&map)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_bool_is_a_config_error() {
        let map = HashMap::from([("VIGIL_ALERTS_ENABLED", "maybe")]);
        let err = VigilConfig::from_lookup(lookup(&map)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn derived_paths_live_under_state_dir() {
        let map = HashMap::from([("VIGIL_STATE_DIR", "/tmp/vigil-test")]);
        let cfg = VigilConfig::from_lookup(lookup(&map)).unwrap();
        assert_eq!(cfg.state_file(), PathBuf::from("/tmp/vigil-test/state.json"));
        assert_eq!(
            cfg.snapshots_dir(),
            PathBuf::from("/tmp/vigil-test/snapshots")
        );
    }
}
