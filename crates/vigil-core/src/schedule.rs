//! Host-scheduler timer registration.
//!
//! The periodic trigger lives outside the application: a system-level
//! systemd timer when possible, then a user-level one, then a crontab
//! entry. Unit and cron text generation is deterministic and tested; only
//! the `systemctl`/`crontab` drives shell out. Non-overlap semantics come
//! from the host: oneshot systemd services do not restart while active,
//! and the cron line wraps the check in `flock -n`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::{self, DEFAULT_TIMEOUT};
use crate::{BoxFuture, VERSION};

/// Base name of the generated units and the cron marker.
pub const TIMER_NAME: &str = "vigil-check";

/// Where the trigger ended up registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerBackend {
    SystemdSystem,
    SystemdUser,
    Cron,
}

impl TimerBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            TimerBackend::SystemdSystem => "systemd (system)",
            TimerBackend::SystemdUser => "systemd (user)",
            TimerBackend::Cron => "cron",
        }
    }
}

impl std::fmt::Display for TimerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration interface to whichever host scheduler is available.
pub trait TimerHost: Send + Sync {
    /// Register the periodic trigger; returns the backend used.
    fn install(&self) -> BoxFuture<'_, Result<TimerBackend>>;

    /// Deregister the trigger from every backend it may live in.
    fn uninstall(&self) -> BoxFuture<'_, Result<()>>;

    /// Current registration, if any.
    fn registration(&self) -> BoxFuture<'_, Result<Option<TimerBackend>>>;
}

/// systemd service unit text for one check invocation.
#[must_use]
pub fn service_unit_text(exe: &str) -> String {
    format!(
        "# Generated by vigil {VERSION}\n\
         [Unit]\n\
         Description=vigil watchdog check\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={exe} check\n"
    )
}

/// systemd timer unit text with the configured interval.
#[must_use]
pub fn timer_unit_text(interval_secs: u64) -> String {
    format!(
        "# Generated by vigil {VERSION}\n\
         [Unit]\n\
         Description=periodic vigil watchdog check\n\
         \n\
         [Timer]\n\
         OnBootSec={interval_secs}\n\
         OnUnitActiveSec={interval_secs}\n\
         AccuracySec=5\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n"
    )
}

/// Crontab line running the check every minute under a non-blocking lock.
#[must_use]
pub fn cron_line(exe: &str) -> String {
    format!("* * * * * flock -n /tmp/{TIMER_NAME}.lock {exe} check # {TIMER_NAME}")
}

/// Remove any previously-managed lines from a crontab body.
#[must_use]
pub fn strip_cron_lines(crontab: &str) -> String {
    crontab
        .lines()
        .filter(|line| !line.contains(&format!("# {TIMER_NAME}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Registrar preferring systemd units over cron.
pub struct SystemTimers {
    exe: String,
    interval_secs: u64,
    system_unit_dir: PathBuf,
    user_unit_dir: Option<PathBuf>,
    is_root: bool,
}

impl SystemTimers {
    #[must_use]
    pub fn new(exe: impl Into<String>, interval_secs: u64) -> Self {
        Self {
            exe: exe.into(),
            interval_secs,
            system_unit_dir: PathBuf::from("/etc/systemd/system"),
            user_unit_dir: dirs::config_dir().map(|d| d.join("systemd/user")),
            is_root: crate::service::is_root(),
        }
    }

    fn unit_dir(&self) -> Option<(PathBuf, TimerBackend)> {
        if exec::which("systemctl").is_none() {
            return None;
        }
        if self.is_root {
            Some((self.system_unit_dir.clone(), TimerBackend::SystemdSystem))
        } else {
            self.user_unit_dir
                .clone()
                .map(|dir| (dir, TimerBackend::SystemdUser))
        }
    }

    fn systemctl_args<'a>(backend: TimerBackend, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(rest.len() + 1);
        if backend == TimerBackend::SystemdUser {
            args.push("--user");
        }
        args.extend_from_slice(rest);
        args
    }

    async fn install_systemd(&self, dir: PathBuf, backend: TimerBackend) -> Result<TimerBackend> {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join(format!("{TIMER_NAME}.service")),
            service_unit_text(&self.exe),
        )?;
        std::fs::write(
            dir.join(format!("{TIMER_NAME}.timer")),
            timer_unit_text(self.interval_secs),
        )?;
        let timer = format!("{TIMER_NAME}.timer");
        exec::run(
            "systemctl",
            &Self::systemctl_args(backend, &["daemon-reload"]),
            None,
            DEFAULT_TIMEOUT,
        )
        .await?;
        exec::run(
            "systemctl",
            &Self::systemctl_args(backend, &["enable", "--now", &timer]),
            None,
            DEFAULT_TIMEOUT,
        )
        .await?;
        tracing::info!(backend = %backend, "timer registered");
        Ok(backend)
    }

    async fn install_cron(&self) -> Result<TimerBackend> {
        if exec::which("crontab").is_none() {
            return Err(Error::Schedule(
                "neither systemd nor crontab is available on this host".to_string(),
            ));
        }
        let current = exec::run_unchecked("crontab", &["-l"], None, DEFAULT_TIMEOUT)
            .await
            .map(|out| if out.success() { out.stdout } else { String::new() })
            .unwrap_or_default();
        let mut body = strip_cron_lines(&current);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&cron_line(&self.exe));
        body.push('\n');

        let tmp = std::env::temp_dir().join(format!("{TIMER_NAME}.crontab"));
        std::fs::write(&tmp, &body)?;
        let tmp_str = tmp.display().to_string();
        let result = exec::run("crontab", &[&tmp_str], None, DEFAULT_TIMEOUT).await;
        let _ = std::fs::remove_file(&tmp);
        result?;
        tracing::info!("cron entry registered");
        Ok(TimerBackend::Cron)
    }

    async fn uninstall_systemd(&self, dir: &std::path::Path, backend: TimerBackend) -> Result<()> {
        let timer = format!("{TIMER_NAME}.timer");
        let _ = exec::run_unchecked(
            "systemctl",
            &Self::systemctl_args(backend, &["disable", "--now", &timer]),
            None,
            DEFAULT_TIMEOUT,
        )
        .await;
        for name in [format!("{TIMER_NAME}.service"), timer] {
            let path = dir.join(name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        let _ = exec::run_unchecked(
            "systemctl",
            &Self::systemctl_args(backend, &["daemon-reload"]),
            None,
            DEFAULT_TIMEOUT,
        )
        .await;
        Ok(())
    }

    async fn uninstall_cron(&self) -> Result<()> {
        if exec::which("crontab").is_none() {
            return Ok(());
        }
        let Ok(out) = exec::run_unchecked("crontab", &["-l"], None, DEFAULT_TIMEOUT).await else {
            return Ok(());
        };
        if !out.success() || !out.stdout.contains(&format!("# {TIMER_NAME}")) {
            return Ok(());
        }
        let mut body = strip_cron_lines(&out.stdout);
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        let tmp = std::env::temp_dir().join(format!("{TIMER_NAME}.crontab"));
        std::fs::write(&tmp, &body)?;
        let tmp_str = tmp.display().to_string();
        let result = exec::run("crontab", &[&tmp_str], None, DEFAULT_TIMEOUT).await;
        let _ = std::fs::remove_file(&tmp);
        result?;
        Ok(())
    }
}

impl TimerHost for SystemTimers {
    fn install(&self) -> BoxFuture<'_, Result<TimerBackend>> {
        Box::pin(async move {
            if let Some((dir, backend)) = self.unit_dir() {
                return self.install_systemd(dir, backend).await;
            }
            self.install_cron().await
        })
    }

    fn uninstall(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if exec::which("systemctl").is_some() {
                let system_dir = self.system_unit_dir.clone();
                self.uninstall_systemd(&system_dir, TimerBackend::SystemdSystem)
                    .await
                    .ok();
                if let Some(dir) = self.user_unit_dir.clone() {
                    self.uninstall_systemd(&dir, TimerBackend::SystemdUser).await.ok();
                }
            }
            self.uninstall_cron().await
        })
    }

    fn registration(&self) -> BoxFuture<'_, Result<Option<TimerBackend>>> {
        Box::pin(async move {
            let timer = format!("{TIMER_NAME}.timer");
            if self.system_unit_dir.join(&timer).exists() {
                return Ok(Some(TimerBackend::SystemdSystem));
            }
            if let Some(dir) = &self.user_unit_dir {
                if dir.join(&timer).exists() {
                    return Ok(Some(TimerBackend::SystemdUser));
                }
            }
            if exec::which("crontab").is_some() {
                if let Ok(out) =
                    exec::run_unchecked("crontab", &["-l"], None, DEFAULT_TIMEOUT).await
                {
                    if out.success() && out.stdout.contains(&format!("# {TIMER_NAME}")) {
                        return Ok(Some(TimerBackend::Cron));
                    }
                }
            }
            Ok(None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unit_runs_check() {
        let text = service_unit_text("/usr/local/bin/vigil");
        assert!(text.contains("Type=oneshot"));
        assert!(text.contains("ExecStart=/usr/local/bin/vigil check"));
    }

    #[test]
    fn timer_unit_uses_interval() {
        let text = timer_unit_text(60);
        assert!(text.contains("OnUnitActiveSec=60"));
        assert!(text.contains("OnBootSec=60"));
        assert!(text.contains("WantedBy=timers.target"));
    }

    #[test]
    fn cron_line_has_lock_and_marker() {
        let line = cron_line("/usr/local/bin/vigil");
        assert!(line.starts_with("* * * * * flock -n"));
        assert!(line.ends_with("# vigil-check"));
    }

    #[test]
    fn strip_cron_lines_removes_only_managed_entries() {
        let crontab = format!(
            "0 3 * * * /usr/bin/backup\n{}\n30 4 * * * echo hi",
            cron_line("/usr/local/bin/vigil")
        );
        let stripped = strip_cron_lines(&crontab);
        assert!(stripped.contains("/usr/bin/backup"));
        assert!(stripped.contains("echo hi"));
        assert!(!stripped.contains("vigil-check"));
    }
}
